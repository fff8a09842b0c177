//! # Segment Scanner
//!
//! Round-robin walk over every configured segment, driving the tuner.
//!
//! The combined scan order holds one receiver entry per configured segment,
//! RX1 entries first. Each advance takes the next entry (wrapping), then moves
//! that receiver's own cursor forward by one (wrapping). A receiver with more
//! segments therefore gets proportionally more dwells; with `RX1: A, B` and
//! `RX2: C` the order is `[RX1, RX1, RX2]` and successive advances from the
//! initial state visit `B, C, A, B, C, A, ...`.
//!
//! Actuation is fire-and-forget: a failed command is logged and the scan
//! proceeds, so the scanner never stalls on hardware control.

use crate::actuator::{Actuator, Profile};
use crate::segments::{NetworkSegment, Receiver, SegmentPosition, SegmentTable};

/// Mutable scanning state over a [`SegmentTable`].
#[derive(Debug, Clone)]
pub struct SegmentIndex {
    table: SegmentTable,
    current: Receiver,
    cursors: [usize; 2],
    scan_order: Vec<Receiver>,
    order_pos: usize,
}

impl SegmentIndex {
    /// Start on RX1 (or RX2 when RX1 has no segments), every cursor at 0.
    pub fn new(table: SegmentTable) -> Self {
        let scan_order: Vec<Receiver> = Receiver::ALL
            .into_iter()
            .flat_map(|rx| std::iter::repeat_n(rx, table.segments(rx).len()))
            .collect();
        let current = scan_order[0];

        Self {
            table,
            current,
            cursors: [0, 0],
            scan_order,
            order_pos: 0,
        }
    }

    pub fn table(&self) -> &SegmentTable {
        &self.table
    }

    pub fn current_receiver(&self) -> Receiver {
        self.current
    }

    /// Position the hardware is (supposed to be) tuned to right now.
    pub fn position(&self) -> SegmentPosition {
        SegmentPosition::new(self.current, self.cursors[self.current.index()])
    }

    pub fn current_segment(&self) -> &NetworkSegment {
        &self.table.segments(self.current)[self.cursors[self.current.index()]]
    }

    pub fn scan_order(&self) -> &[Receiver] {
        &self.scan_order
    }

    /// Bring the device in line with the initial state: select the starting
    /// receiver, activate `profile` on every receiver that has segments, and
    /// tune the starting segment.
    pub fn prime(&self, actuator: &impl Actuator, profile: Profile) {
        if let Err(e) = actuator.select_receiver(self.current) {
            tracing::warn!(receiver = %self.current, error = %e, "failed to select receiver");
        }

        for rx in Receiver::ALL {
            if self.table.segments(rx).is_empty() {
                continue;
            }
            if let Err(e) = actuator.activate_profile(rx, profile) {
                tracing::warn!(
                    receiver = %rx,
                    profile = profile.id(),
                    error = %e,
                    "failed to activate profile"
                );
            }
        }

        let segment = self.current_segment();
        if let Err(e) = actuator.retune(self.current, &segment.frequency) {
            tracing::warn!(
                receiver = %self.current,
                segment = %segment.name,
                frequency = %segment.frequency,
                error = %e,
                "failed to tune initial segment"
            );
        }
    }

    /// Move to the next segment in the combined order and retune the device.
    ///
    /// Issues `retune` for the new segment and, when the receiver changes,
    /// `select_receiver`. Returns the new position.
    pub fn advance(&mut self, actuator: &impl Actuator) -> SegmentPosition {
        let previous = self.current;

        let next_pos = (self.order_pos + 1) % self.scan_order.len();
        let next_rx = self.scan_order[next_pos];

        let slot = next_rx.index();
        let count = self.table.segments(next_rx).len();
        self.cursors[slot] = (self.cursors[slot] + 1) % count;
        let segment = &self.table.segments(next_rx)[self.cursors[slot]];

        if let Err(e) = actuator.retune(next_rx, &segment.frequency) {
            tracing::warn!(
                receiver = %next_rx,
                segment = %segment.name,
                frequency = %segment.frequency,
                error = %e,
                "failed to retune"
            );
        }

        if previous != next_rx {
            if let Err(e) = actuator.select_receiver(next_rx) {
                tracing::warn!(receiver = %next_rx, error = %e, "failed to select receiver");
            }
        }

        tracing::debug!(
            receiver = %next_rx,
            segment = %segment.name,
            frequency = %segment.frequency,
            "advanced to segment"
        );

        self.current = next_rx;
        self.order_pos = next_pos;

        SegmentPosition::new(next_rx, self.cursors[slot])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Command, RecordingActuator};

    fn table(input: &str) -> SegmentTable {
        SegmentTable::parse(input).unwrap()
    }

    fn abc() -> SegmentTable {
        table("RX1, A, 100, 5.0\nRX1, B, 200, 5.0\nRX2, C, 300, 5.0")
    }

    #[test]
    fn scan_order_is_receiver_major() {
        let idx = SegmentIndex::new(table("RX2, C, 3, 1\nRX1, A, 1, 1\nRX2, D, 4, 1"));
        assert_eq!(idx.scan_order(), [Receiver::Rx1, Receiver::Rx2, Receiver::Rx2]);
    }

    #[test]
    fn starts_on_rx2_when_rx1_is_unconfigured() {
        let idx = SegmentIndex::new(table("RX2, C, 300, 5.0"));
        assert_eq!(idx.current_receiver(), Receiver::Rx2);
        assert_eq!(idx.position(), SegmentPosition::new(Receiver::Rx2, 0));
    }

    #[test]
    fn three_advances_visit_b_c_a() {
        let mut idx = SegmentIndex::new(abc());
        let act = RecordingActuator::default();

        let visited: Vec<_> = (0..3)
            .map(|_| {
                let pos = idx.advance(&act);
                idx.table().get(pos).unwrap().name.clone()
            })
            .collect();
        assert_eq!(visited, ["B", "C", "A"]);

        assert_eq!(
            act.take(),
            [
                Command::Retune(Receiver::Rx1, "200".into()),
                Command::Retune(Receiver::Rx2, "300".into()),
                Command::Select(Receiver::Rx2),
                Command::Retune(Receiver::Rx1, "100".into()),
                Command::Select(Receiver::Rx1),
            ]
        );
    }

    #[test]
    fn failing_actuator_does_not_stall_the_scan() {
        let mut idx = SegmentIndex::new(abc());
        let act = RecordingActuator::failing();
        let first = idx.advance(&act);
        let second = idx.advance(&act);
        assert_eq!(first, SegmentPosition::new(Receiver::Rx1, 1));
        assert_eq!(second, SegmentPosition::new(Receiver::Rx2, 0));
        assert_eq!(idx.current_receiver(), Receiver::Rx2);
    }

    #[test]
    fn single_segment_retunes_every_advance_without_switching() {
        let mut idx = SegmentIndex::new(table("RX1, only, 42, 1.0"));
        let act = RecordingActuator::default();
        for _ in 0..3 {
            assert_eq!(idx.advance(&act), SegmentPosition::new(Receiver::Rx1, 0));
        }
        let cmds = act.take();
        assert_eq!(cmds.len(), 3);
        assert!(cmds.iter().all(|c| matches!(c, Command::Retune(Receiver::Rx1, _))));
    }

    #[test]
    fn prime_activates_only_configured_receivers() {
        let idx = SegmentIndex::new(table("RX1, A, 100, 5.0"));
        let act = RecordingActuator::default();
        idx.prime(&act, Profile::First);
        assert_eq!(
            act.take(),
            [
                Command::Select(Receiver::Rx1),
                Command::Activate(Receiver::Rx1, Profile::First),
                Command::Retune(Receiver::Rx1, "100".into()),
            ]
        );
    }
}
