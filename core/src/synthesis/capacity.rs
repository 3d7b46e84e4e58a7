/// Learned ceiling on the number of characters passed to one inference call.
///
/// Only ever shrinks. Once the next trial value would fall below `floor` the limit stays
/// where it is and the caller reports the segment as too large.
#[derive(Debug, Clone, PartialEq)]
pub struct CapacityLimit {
    current: usize,
    floor: usize,
    shrink_factor: f32,
}

impl CapacityLimit {
    pub fn new(initial: usize, floor: usize, shrink_factor: f32) -> Self {
        let initial = initial.max(1);
        let shrink_factor = if shrink_factor > 0.0 && shrink_factor < 1.0 {
            shrink_factor
        } else {
            0.5
        };
        Self {
            current: initial,
            floor: floor.clamp(1, initial),
            shrink_factor,
        }
    }

    pub fn current(&self) -> usize {
        self.current
    }

    pub fn floor(&self) -> usize {
        self.floor
    }

    /// Next trial capacity after an overflow on a sub-segment of `attempted_len` characters.
    pub fn next_trial(&self, attempted_len: usize) -> usize {
        let base = attempted_len.min(self.current) as f32;
        (base * self.shrink_factor).floor() as usize
    }

    /// Shrink after an overflow. Returns the new limit, or `None` if it would drop below the
    /// floor (the limit is left unchanged in that case).
    pub fn shrink(&mut self, attempted_len: usize) -> Option<usize> {
        let next = self.next_trial(attempted_len);
        if next < self.floor {
            return None;
        }
        self.current = next;
        Some(next)
    }

    /// Lower the limit to `value` if that is smaller; never raises it.
    pub fn cap_at(&mut self, value: usize) {
        if value >= self.floor && value < self.current {
            self.current = value;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shrinks_relative_to_failing_length() {
        let mut limit = CapacityLimit::new(100, 10, 0.5);
        assert_eq!(limit.shrink(90), Some(45));
        assert_eq!(limit.current(), 45);
    }

    #[test]
    fn failing_length_is_capped_by_current_limit() {
        let mut limit = CapacityLimit::new(40, 10, 0.5);
        assert_eq!(limit.shrink(400), Some(20));
    }

    #[test]
    fn refuses_to_go_below_floor() {
        let mut limit = CapacityLimit::new(30, 10, 0.5);
        assert_eq!(limit.shrink(30), Some(15));
        assert_eq!(limit.shrink(15), None);
        assert_eq!(limit.current(), 15);
    }

    #[test]
    fn never_increases() {
        let mut limit = CapacityLimit::new(1000, 1, 0.5);
        let mut previous = limit.current();
        for attempted in [2000, 999, 600, 7, 300, 3, 1] {
            limit.shrink(attempted);
            limit.cap_at(attempted * 3);
            assert!(limit.current() <= previous);
            previous = limit.current();
        }
    }

    #[test]
    fn floor_never_exceeds_initial_limit() {
        let limit = CapacityLimit::new(5, 10, 0.5);
        assert_eq!(limit.floor(), 5);
        let limit = CapacityLimit::new(0, 0, 7.0);
        assert_eq!((limit.current(), limit.floor()), (1, 1));
    }
}
