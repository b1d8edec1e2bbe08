//! Bounded alert history (most recent first)

use crate::models::Alert;
use std::collections::VecDeque;

/// Ring buffer of alerts; the oldest alert is evicted when full
#[derive(Debug)]
pub struct AlertLog {
    alerts: VecDeque<Alert>,
    capacity: usize,
}

impl AlertLog {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            alerts: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append an alert, returning the evicted one if the log was full
    pub fn push(&mut self, alert: Alert) -> Option<Alert> {
        self.alerts.push_front(alert);
        if self.alerts.len() > self.capacity {
            self.alerts.pop_back()
        } else {
            None
        }
    }

    /// Latest `count` alerts, newest first
    pub fn latest(&self, count: usize) -> Vec<Alert> {
        self.alerts.iter().take(count).cloned().collect()
    }

    pub fn by_camera(&self, camera_id: &str, count: usize) -> Vec<Alert> {
        self.alerts
            .iter()
            .filter(|a| a.camera_id == camera_id)
            .take(count)
            .cloned()
            .collect()
    }

    pub fn clear(&mut self) {
        self.alerts.clear();
    }

    pub fn len(&self) -> usize {
        self.alerts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.alerts.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
