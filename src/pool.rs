//! Double-buffered lanes.
//!
//! Each [`Lane`] owns a read and a write [`Buffer`]. A generation reads one
//! and writes the other; [`Lane::swap`] flips a flag instead of moving
//! buffers, so steady-state generations allocate nothing once the buffers
//! have grown to size.

use crate::buffer::Buffer;
use crate::encoding::EncodedId;

pub const DEFAULT_LANES: usize = 4;
pub const DEFAULT_BUFFER_CAPACITY: usize = 32;

#[derive(Debug, Clone)]
pub struct Lane {
    buffers: [Buffer; 2],
    flipped: bool,
}

impl Lane {
    pub fn new(capacity: usize) -> Self {
        Lane {
            buffers: [Buffer::with_capacity(capacity), Buffer::with_capacity(capacity)],
            flipped: false,
        }
    }

    #[inline]
    pub fn read(&self) -> &Buffer {
        &self.buffers[self.flipped as usize]
    }

    #[inline]
    pub fn read_mut(&mut self) -> &mut Buffer {
        &mut self.buffers[self.flipped as usize]
    }

    #[inline]
    pub fn write(&mut self) -> &mut Buffer {
        &mut self.buffers[!self.flipped as usize]
    }

    /// Both roles at once, for a generation that reads one while filling the other.
    #[inline]
    pub fn split(&mut self) -> (&Buffer, &mut Buffer) {
        let [a, b] = &mut self.buffers;
        if self.flipped {
            (&*b, a)
        } else {
            (&*a, b)
        }
    }

    /// Turns the write buffer into the read buffer and empties the new write buffer.
    #[inline]
    pub fn swap(&mut self) {
        self.flipped = !self.flipped;
        self.write().clear();
    }

    pub fn reset(&mut self) {
        for buf in &mut self.buffers {
            buf.clear();
        }
        self.flipped = false;
    }
}

/// Fixed set of independent lanes. No buffer is shared between lanes.
#[derive(Debug, Clone)]
pub struct Pool {
    lanes: Vec<Lane>,
}

impl Pool {
    pub fn new(lanes: usize, capacity: usize) -> Self {
        Pool { lanes: (0..lanes.max(1)).map(|_| Lane::new(capacity)).collect() }
    }

    pub fn lane_count(&self) -> usize {
        self.lanes.len()
    }

    pub fn lane_mut(&mut self, lane: usize) -> &mut Lane {
        &mut self.lanes[lane]
    }

    pub fn lanes_mut(&mut self) -> &mut [Lane] {
        &mut self.lanes
    }

    pub fn read(&self, lane: usize) -> &Buffer {
        self.lanes[lane].read()
    }

    pub fn write(&mut self, lane: usize) -> &mut Buffer {
        self.lanes[lane].write()
    }

    pub fn swap(&mut self, lane: usize) {
        self.lanes[lane].swap();
    }

    pub fn swap_all(&mut self) {
        for lane in &mut self.lanes {
            lane.swap();
        }
    }

    pub fn reset(&mut self) {
        for lane in &mut self.lanes {
            lane.reset();
        }
    }

    /// Total number of ids across all read buffers.
    pub fn len(&self) -> usize {
        self.lanes.iter().map(|l| l.read().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Concatenates every lane's read buffer in ascending lane order.
    pub fn read_all(&self) -> Vec<EncodedId> {
        let mut out = Vec::with_capacity(self.len());
        for lane in &self.lanes {
            out.extend_from_slice(lane.read().as_slice());
        }
        out
    }

    /// Splits lane 0's read buffer into contiguous ascending ranges, one per
    /// lane, the last taking the remainder. Returns the range length used for
    /// all but the last lane.
    pub fn distribute(&mut self) -> usize {
        let lanes = self.lanes.len();
        let total = self.lanes[0].read().len();
        let chunk = total / lanes;

        let (first, rest) = self.lanes.split_at_mut(1);
        let source = first[0].read().as_slice();
        for (i, lane) in rest.iter_mut().enumerate() {
            let from = (i + 1) * chunk;
            let to = if i + 2 == lanes { total } else { from + chunk };
            lane.reset();
            lane.write().extend_from_slice(&source[from..to]);
            lane.swap();
        }
        if lanes > 1 {
            first[0].read_mut().truncate(chunk);
        }
        chunk
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(raw: &[u8]) -> Vec<EncodedId> {
        raw.iter().map(|&r| EncodedId::from_raw(r)).collect()
    }

    #[test]
    fn swap_flips_roles_without_copying() {
        let mut lane = Lane::new(4);
        lane.write().extend_from_slice(&ids(&[1, 2]));
        assert!(lane.read().is_empty());
        lane.swap();
        assert_eq!(lane.read().as_slice(), ids(&[1, 2]).as_slice());
        assert!(lane.write().is_empty());

        let (read, write) = lane.split();
        write.extend_from_slice(read.as_slice());
        write.push(EncodedId::from_raw(3));
        lane.swap();
        assert_eq!(lane.read().as_slice(), ids(&[1, 2, 3]).as_slice());
    }

    #[test]
    fn reset_restores_orientation() {
        let mut pool = Pool::new(2, 4);
        pool.write(1).push(EncodedId::from_raw(5));
        pool.swap(1);
        pool.reset();
        assert!(pool.is_empty());
        pool.lane_mut(1).read_mut().push(EncodedId::from_raw(6));
        assert_eq!(pool.read(1).as_slice(), ids(&[6]).as_slice());
    }

    #[test]
    fn read_all_concatenates_in_lane_order() {
        let mut pool = Pool::new(3, 2);
        pool.write(2).extend_from_slice(&ids(&[7, 8]));
        pool.write(0).push(EncodedId::from_raw(1));
        pool.write(1).extend_from_slice(&ids(&[4, 5, 6]));
        pool.swap_all();
        assert_eq!(pool.read_all(), ids(&[1, 4, 5, 6, 7, 8]));
        assert_eq!(pool.len(), 6);
    }

    #[test]
    fn distribute_partitions_contiguously() {
        let mut pool = Pool::new(4, 2);
        let seq: Vec<u8> = (0..11).collect();
        pool.lane_mut(0).read_mut().extend_from_slice(&ids(&seq));

        let chunk = pool.distribute();
        assert_eq!(chunk, 2);
        assert_eq!(pool.read(0).as_slice(), ids(&[0, 1]).as_slice());
        assert_eq!(pool.read(1).as_slice(), ids(&[2, 3]).as_slice());
        assert_eq!(pool.read(2).as_slice(), ids(&[4, 5]).as_slice());
        assert_eq!(pool.read(3).as_slice(), ids(&[6, 7, 8, 9, 10]).as_slice());
        assert_eq!(pool.read_all(), ids(&seq));
    }

    #[test]
    fn distribute_short_sequence_lands_in_last_lane() {
        let mut pool = Pool::new(4, 2);
        pool.lane_mut(0).read_mut().extend_from_slice(&ids(&[1, 2, 3]));
        pool.distribute();
        assert!(pool.read(0).is_empty());
        assert_eq!(pool.read(3).as_slice(), ids(&[1, 2, 3]).as_slice());
        assert_eq!(pool.read_all(), ids(&[1, 2, 3]));
    }

    #[test]
    fn single_lane_distribute_is_a_no_op() {
        let mut pool = Pool::new(1, 2);
        pool.lane_mut(0).read_mut().extend_from_slice(&ids(&[1, 2, 3]));
        assert_eq!(pool.distribute(), 3);
        assert_eq!(pool.read_all(), ids(&[1, 2, 3]));
    }
}
