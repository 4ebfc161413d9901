use core::{iter::once, ops::{Add, Sub}};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum AxisId { X, Y, Z, E }
pub static AXIS_ID_LIST: [AxisId; 4] = [AxisId::X, AxisId::Y, AxisId::Z, AxisId::E];
pub static XYZ_ID_LIST: [AxisId; 3] = [AxisId::X, AxisId::Y, AxisId::Z];

impl AxisId {
    pub fn letter(self) -> char {
        match self {
            AxisId::X => 'X',
            AxisId::Y => 'Y',
            AxisId::Z => 'Z',
            AxisId::E => 'E',
        }
    }
}

/// One value per logical axis. The E slot follows the active extruder.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct XYZEData<T> {
    pub x: T,
    pub y: T,
    pub z: T,
    pub e: T,
}

impl<T> Add for XYZEData<T> where T: Add::<Output=T> {
    type Output=XYZEData<T>;
    fn add(self, rhs: Self) -> Self::Output {
        Self {
            x: self.x + rhs.x,
            y: self.y + rhs.y,
            z: self.z + rhs.z,
            e: self.e + rhs.e,
        }
    }
}

impl<T> Sub for XYZEData<T> where T: Sub::<Output=T> {
    type Output=XYZEData<T>;
    fn sub(self, rhs: Self) -> Self::Output {
        Self {
            x: self.x - rhs.x,
            y: self.y - rhs.y,
            z: self.z - rhs.z,
            e: self.e - rhs.e,
        }
    }
}

impl<T> XYZEData<T> {
    pub const fn new(x: T, y: T, z: T, e: T) -> Self {
        Self { x, y, z, e }
    }

    pub fn from_clone(state: T) -> Self where T: Clone {
        Self {
            x: state.clone(),
            y: state.clone(),
            z: state.clone(),
            e: state,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item=&T> {
        once(&self.x).chain(once(&self.y)).chain(once(&self.z)).chain(once(&self.e))
    }

    pub fn match_id(&self, id: AxisId) -> &T {
        match id {
            AxisId::X => &self.x,
            AxisId::Y => &self.y,
            AxisId::Z => &self.z,
            AxisId::E => &self.e,
        }
    }

    pub fn match_id_mut(&mut self, id: AxisId) -> &mut T {
        match id {
            AxisId::X => &mut self.x,
            AxisId::Y => &mut self.y,
            AxisId::Z => &mut self.z,
            AxisId::E => &mut self.e,
        }
    }

    /// Checks X, Y and Z only.
    pub fn all_xyz(&self, predicate: impl Fn(&T) -> bool) -> bool {
        predicate(&self.x) && predicate(&self.y) && predicate(&self.z)
    }

    pub fn map<TR>(&self, p: impl Fn(&T) -> TR) -> XYZEData<TR> {
        XYZEData { x: p(&self.x), y: p(&self.y), z: p(&self.z), e: p(&self.e) }
    }

    pub fn zip_map<U, TR>(&self, other: &XYZEData<U>, p: impl Fn(&T, &U) -> TR) -> XYZEData<TR> {
        XYZEData {
            x: p(&self.x, &other.x),
            y: p(&self.y, &other.y),
            z: p(&self.z, &other.z),
            e: p(&self.e, &other.e),
        }
    }
}
