use array_init::array_init;

/// Fixed capacity FIFO. Unlike a ring log it never overwrites: a push into a
/// full buffer hands the item back so the producer can stop reading.
#[derive(Clone)]
pub struct CircularBuffer<T, const SIZE: usize> {
    data: [T; SIZE],
    begin: usize,
    length: usize,
}

impl<T, const SIZE: usize> Default for CircularBuffer<T, SIZE> where T: Default {
    fn default() -> Self {
        let data = array_init(|_| Default::default());
        Self {
            data,
            length: 0,
            begin: 0,
        }
    }
}

impl<T, const SIZE: usize> CircularBuffer<T, SIZE> {
    fn wrap_index(i: usize) -> usize {
        i % SIZE
    }

    pub fn push(&mut self, item: T) -> Result<(), T> {
        if self.is_full() {
            return Err(item);
        }
        let i = Self::wrap_index(self.begin + self.length);
        self.data[i] = item;
        self.length += 1;
        Ok(())
    }

    pub fn pop(&mut self) -> Option<T> where T: Default {
        if self.is_empty() {
            return None;
        }
        let item = core::mem::take(&mut self.data[self.begin]);
        self.begin = Self::wrap_index(self.begin + 1);
        self.length -= 1;
        Some(item)
    }

    pub fn front(&self) -> Option<&T> {
        if self.is_empty() { None } else { Some(&self.data[self.begin]) }
    }

    pub fn length(&self) -> usize {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    pub fn is_full(&self) -> bool {
        self.length == SIZE
    }

    pub fn clear(&mut self) where T: Default {
        while self.pop().is_some() {}
        self.begin = 0;
    }
}
