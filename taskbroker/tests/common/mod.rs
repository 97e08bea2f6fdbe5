//! Shared helpers for the integration tests.

#![allow(dead_code)]

use std::time::Duration;
use taskbroker::item::{SlotStatus, SubmissionTag, WorkItem};

/// Doubles its input after an optional delay.
#[derive(Debug, Clone, Default)]
pub struct Job {
    pub id: usize,
    pub input: u64,
    pub output: u64,
    pub delay: Duration,
    pub fail: bool,
    pub tag: SubmissionTag,
}

impl Job {
    pub fn new(id: usize) -> Self {
        Self {
            id,
            input: id as u64 + 1,
            ..Default::default()
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

impl WorkItem for Job {
    fn process(&mut self) -> bool {
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        self.output = self.input * 2;
        !self.fail
    }

    fn tag(&self) -> &SubmissionTag {
        &self.tag
    }

    fn tag_mut(&mut self) -> &mut SubmissionTag {
        &mut self.tag
    }
}

/// `n` jobs with every slot pending.
pub fn batch(n: usize) -> (Vec<Job>, Vec<SlotStatus>) {
    ((0..n).map(Job::new).collect(), vec![SlotStatus::Pending; n])
}

/// Slots still pending.
pub fn pending(mask: &[SlotStatus]) -> usize {
    mask.iter().filter(|s| **s == SlotStatus::Pending).count()
}

/// Every returned slot holds its own item, processed.
pub fn assert_in_place(items: &[Job], mask: &[SlotStatus]) {
    for (position, (item, status)) in items.iter().zip(mask).enumerate() {
        if status.is_returned() {
            assert_eq!(item.id, position, "slot {} holds item {}", position, item.id);
            assert_eq!(item.tag.position, position);
        }
        if *status == SlotStatus::Processed {
            assert_eq!(item.output, item.input * 2);
        }
    }
}
