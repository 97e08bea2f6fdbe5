//! Synthetic work items for `taskbroker run`.

use std::time::Duration;
use taskbroker::item::{SlotStatus, SubmissionTag, WorkItem};

/// Hashes its seed after sleeping for `work`.
#[derive(Debug, Clone, Default)]
pub struct SyntheticItem {
    pub seed: u64,
    pub work: Duration,
    pub fail: bool,
    pub digest: u64,
    tag: SubmissionTag,
}

impl SyntheticItem {
    pub fn new(seed: u64, work: Duration, fail: bool) -> Self {
        Self {
            seed,
            work,
            fail,
            ..Default::default()
        }
    }
}

impl WorkItem for SyntheticItem {
    fn process(&mut self) -> bool {
        if !self.work.is_zero() {
            std::thread::sleep(self.work);
        }
        // xorshift64*
        let mut x = self.seed | 1;
        for _ in 0..64 {
            x ^= x >> 12;
            x ^= x << 25;
            x ^= x >> 27;
        }
        self.digest = x.wrapping_mul(0x2545_F491_4F6C_DD1D);
        !self.fail
    }

    fn tag(&self) -> &SubmissionTag {
        &self.tag
    }

    fn tag_mut(&mut self) -> &mut SubmissionTag {
        &mut self.tag
    }
}

/// Shape of the batch handed to every iteration.
#[derive(Debug, Clone, Copy)]
pub struct Workload {
    pub items: usize,
    pub work: Duration,
    /// Every n-th item fails; 0 disables failures.
    pub fail_every: usize,
}

impl Workload {
    /// A fresh batch with every slot pending.
    pub fn batch(&self, iteration: u64) -> (Vec<SyntheticItem>, Vec<SlotStatus>) {
        let items = (0..self.items)
            .map(|i| {
                let fail = self.fail_every > 0 && (i + 1) % self.fail_every == 0;
                SyntheticItem::new(iteration << 32 | i as u64, self.work, fail)
            })
            .collect();
        (items, vec![SlotStatus::Pending; self.items])
    }
}
