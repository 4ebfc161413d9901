use arrayvec::ArrayVec;

/// Small FIFO used for commands the firmware feeds itself. It is drained
/// ahead of every external source.
#[derive(Default)]
pub struct Channel<T, const SIZE: usize> {
    buffer: ArrayVec<T, SIZE>,
}

fn send<T, const SIZE: usize>(buffer: &mut ArrayVec<T, SIZE>, item: T) -> Result<(), T> {
    if buffer.remaining_capacity() != 0 {
        buffer.push(item);
        Ok(())
    }
    else { Err(item) }
}
fn receive<T, const SIZE: usize>(buffer: &mut ArrayVec<T, SIZE>) -> Option<T> {
    if buffer.is_empty() { None }
    else { Some(buffer.remove(0)) }
}

pub trait CanSendMut<T> {
    fn send_mut(&mut self, item: T) -> Result<(), T>;
}
pub trait CanReceiveMut<T> {
    fn receive_mut(&mut self) -> Option<T>;
}

impl<T, const SIZE: usize> CanSendMut<T> for Channel<T, SIZE> {
    fn send_mut(&mut self, item: T) -> Result<(), T> { send(&mut self.buffer, item) }
}
impl<T, const SIZE: usize> CanReceiveMut<T> for Channel<T, SIZE> {
    fn receive_mut(&mut self) -> Option<T> { receive(&mut self.buffer) }
}

impl<T, const SIZE: usize> Channel<T, SIZE> {
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}
