pub mod gate;
pub mod status;

pub use gate::{AuthenticationGate, GateOutcome, PasswordPrompt, TerminalPrompt};
pub use status::{LedBank, LedColor, StateBits, StateField, StatusSnapshot, Zone, STATE_WIDTH};

use crate::core::authorize::AnnotatedFrame;
use crossbeam_channel::{Receiver, Sender};
use std::io::{self, BufRead, Write};

/// Operator response to a raised alarm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlarmDecision {
    Abort,
    Ignore,
}

/// Cross-activity handoffs into the render activity. One-shot reply
/// channels carry answers back; no fields are shared between threads.
pub enum PanelEvent {
    Status(StatusSnapshot),
    Frame(AnnotatedFrame),
    AlarmRaised { decision: Sender<AlarmDecision> },
    Shutdown,
}

/// Render collaborator. Rendering itself is outside the core; this seam is
/// what the core hands decoded state to.
pub trait StatusRenderer {
    fn render_status(&mut self, snapshot: &StatusSnapshot);
    fn render_frame(&mut self, frame: &AnnotatedFrame);
    fn confirm_alarm(&mut self) -> AlarmDecision;
}

/// Foreground event loop: drains panel events until shutdown.
pub struct Panel<R: StatusRenderer> {
    events: Receiver<PanelEvent>,
    renderer: R,
}

impl<R: StatusRenderer> Panel<R> {
    pub fn new(events: Receiver<PanelEvent>, renderer: R) -> Self {
        Self { events, renderer }
    }

    pub fn run(mut self) {
        for event in self.events.iter() {
            match event {
                PanelEvent::Status(snapshot) => self.renderer.render_status(&snapshot),
                PanelEvent::Frame(frame) => self.renderer.render_frame(&frame),
                PanelEvent::AlarmRaised { decision } => {
                    let choice = self.renderer.confirm_alarm();
                    // Dispatch side may have given up waiting; nothing to do
                    let _ = decision.send(choice);
                }
                PanelEvent::Shutdown => break,
            }
        }
        tracing::info!("Panel loop ended");
    }
}

/// Line-oriented terminal rendering of the status model.
pub struct TerminalRenderer;

impl TerminalRenderer {
    pub fn format_status(snapshot: &StatusSnapshot) -> String {
        let mut out = String::new();
        out.push_str(&format!(
            "Motion Sensor: {}\n",
            if snapshot.motion { "Detected" } else { "Clear" }
        ));
        out.push_str(&format!(
            "Zone {:?} | Solenoid: {} | Magnetic Sensor: {}\n",
            snapshot.active_zone,
            if snapshot.solenoid_engaged { "Engaged" } else { "Disengaged" },
            if snapshot.magnetic_sensor_on { "On" } else { "Off" },
        ));
        for (i, bank) in snapshot.leds.iter().enumerate() {
            let lit: Vec<&str> = bank
                .slots()
                .iter()
                .filter(|(_, on)| *on)
                .map(|(color, _)| match color {
                    LedColor::Alert => "alert",
                    LedColor::Warn => "warn",
                    LedColor::Ok => "ok",
                })
                .collect();
            out.push_str(&format!(
                "LED bank {}: {}\n",
                i + 1,
                if lit.is_empty() { "all off".to_string() } else { lit.join(", ") }
            ));
        }
        out
    }
}

impl StatusRenderer for TerminalRenderer {
    fn render_status(&mut self, snapshot: &StatusSnapshot) {
        print!("{}", Self::format_status(snapshot));
    }

    fn render_frame(&mut self, frame: &AnnotatedFrame) {
        tracing::debug!(
            "Frame {}x{}, {} face(s), {:.1} fps",
            frame.image.width(),
            frame.image.height(),
            frame.labels.len(),
            frame.fps
        );
    }

    fn confirm_alarm(&mut self) -> AlarmDecision {
        print!("Alarm triggered. Abort alarm? [y/N]: ");
        if io::stdout().flush().is_err() {
            return AlarmDecision::Ignore;
        }
        let mut answer = String::new();
        match io::stdin().lock().read_line(&mut answer) {
            Ok(_) if answer.trim().eq_ignore_ascii_case("y") => AlarmDecision::Abort,
            _ => AlarmDecision::Ignore,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;

    struct RecordingRenderer {
        statuses: Vec<StatusSnapshot>,
        frames: usize,
        alarm_answer: AlarmDecision,
        alarms: usize,
    }

    impl RecordingRenderer {
        fn new(alarm_answer: AlarmDecision) -> Self {
            Self { statuses: Vec::new(), frames: 0, alarm_answer, alarms: 0 }
        }
    }

    impl StatusRenderer for RecordingRenderer {
        fn render_status(&mut self, snapshot: &StatusSnapshot) {
            self.statuses.push(*snapshot);
        }

        fn render_frame(&mut self, _frame: &AnnotatedFrame) {
            self.frames += 1;
        }

        fn confirm_alarm(&mut self) -> AlarmDecision {
            self.alarms += 1;
            self.alarm_answer
        }
    }

    #[test]
    fn panel_forwards_events_until_shutdown() {
        let (tx, rx) = unbounded();
        let (decision_tx, decision_rx) = unbounded();

        let snapshot = StatusSnapshot::decode(StateBits::parse("1000000100").unwrap());
        tx.send(PanelEvent::Status(snapshot)).unwrap();
        tx.send(PanelEvent::AlarmRaised { decision: decision_tx }).unwrap();
        tx.send(PanelEvent::Shutdown).unwrap();
        // Anything after shutdown is never rendered
        tx.send(PanelEvent::Status(snapshot)).unwrap();

        let panel = Panel::new(rx, RecordingRenderer::new(AlarmDecision::Abort));
        panel.run();

        assert_eq!(decision_rx.try_recv().unwrap(), AlarmDecision::Abort);
    }

    #[test]
    fn terminal_renderer_formats_status_lines() {
        let snapshot = StatusSnapshot::decode(StateBits::parse("1100001111").unwrap());
        let text = TerminalRenderer::format_status(&snapshot);
        assert!(text.contains("Motion Sensor: Detected"));
        assert!(text.contains("Zone A"));
        assert!(text.contains("Solenoid: Engaged"));
        assert!(text.contains("Magnetic Sensor: On"));
        assert!(text.contains("LED bank 1: alert"));
        assert!(text.contains("LED bank 2: ok"));
    }
}
