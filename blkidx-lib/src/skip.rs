/// Turn the lowest '1' bit in the binary representation of a number into a '0'.
fn invert_lowest_one(n: usize) -> usize {
    n & n.saturating_sub(1)
}

/// Height of the block that a block at `height` keeps a skip pointer to.
///
/// Any number strictly lower than `height` is acceptable, but the following
/// expression yields only O(log n) hops between any two heights.
pub fn skip_height(height: usize) -> usize {
    if height < 2 {
        return 0;
    }
    if height & 1 == 1 {
        invert_lowest_one(invert_lowest_one(height - 1)) + 1
    } else {
        invert_lowest_one(height)
    }
}

/// Next step of an ancestor walk.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Hop {
    Skip,
    Parent,
}

impl Hop {
    /// Choose how to leave a block at `height` (with or without a skip pointer)
    /// when walking down to `target`.
    pub fn choose(height: usize, target: usize, has_skip: bool) -> Self {
        Self::decide(
            height,
            target,
            has_skip,
            skip_height(height),
            skip_height(height - 1),
        )
    }

    /// Only follow the skip pointer if it lands exactly on `target`, or above it
    /// without overshooting a better skip available from the parent: when the
    /// parent's pointer jumps further (by more than 2) while staying at or above
    /// `target`, taking the parent link first is cheaper.
    ///
    /// `skip` and `skip_prev` are the skip heights of `height` and `height - 1`.
    pub fn decide(
        height: usize,
        target: usize,
        has_skip: bool,
        skip: usize,
        skip_prev: usize,
    ) -> Self {
        debug_assert!(height > target);
        debug_assert!(skip < height);
        let parent_is_better = skip_prev + 2 < skip && skip_prev >= target;
        if has_skip && (skip == target || (skip > target && !parent_is_better)) {
            Hop::Skip
        } else {
            Hop::Parent
        }
    }
}
