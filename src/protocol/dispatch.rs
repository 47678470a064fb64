use crate::camera::CameraSession;
use crate::common::config::{CameraConfig, MatcherConfig};
use crate::common::error::Result;
use crate::core::authorize::{AnnotatedFrame, AuthorizationLoop, LoopOutcome};
use crate::core::detection_log::DetectionLogger;
use crate::core::matcher::{FaceMatcher, UNAUTHORISED};
use crate::core::provider::FaceEncodingProvider;
use crate::core::registry::KnownFaceRegistry;
use crate::link::SerialLink;
use crate::panel::{AlarmDecision, PanelEvent, StatusSnapshot};
use crate::protocol::{decode, wire, InboundMessage};
use crossbeam_channel::{bounded, Receiver, Sender};
use std::sync::Arc;

/// Runs one full recognition session to a decision.
///
/// Seam between the dispatcher and the camera stack so dispatch logic is
/// testable without hardware.
pub trait RecognitionService {
    fn run_session(&mut self) -> LoopOutcome;
}

/// Production recognition service: opens a fresh camera session per request
/// and drives an `AuthorizationLoop` over it. The debounce table inside the
/// detection logger survives across sessions.
pub struct CameraRecognitionService {
    camera: CameraConfig,
    matcher: MatcherConfig,
    provider: Arc<dyn FaceEncodingProvider + Send + Sync>,
    registry: Arc<KnownFaceRegistry>,
    log: DetectionLogger,
    frames: Sender<AnnotatedFrame>,
    quit: Receiver<()>,
}

impl CameraRecognitionService {
    pub fn new(
        camera: CameraConfig,
        matcher: MatcherConfig,
        provider: Arc<dyn FaceEncodingProvider + Send + Sync>,
        registry: Arc<KnownFaceRegistry>,
        log: DetectionLogger,
        frames: Sender<AnnotatedFrame>,
        quit: Receiver<()>,
    ) -> Self {
        Self { camera, matcher, provider, registry, log, frames, quit }
    }
}

impl RecognitionService for CameraRecognitionService {
    fn run_session(&mut self) -> LoopOutcome {
        let session = match CameraSession::open(&self.camera) {
            Ok(session) => session,
            Err(e) => return LoopOutcome::Failed(e),
        };

        AuthorizationLoop::new(
            session,
            self.provider.as_ref(),
            FaceMatcher::new(self.matcher.match_threshold),
            &self.registry,
            &mut self.log,
            self.matcher.frame_scale,
            self.frames.clone(),
            self.quit.clone(),
        )
        .run()
    }
}

/// Reads inbound lines and routes them: alarms to the operator, recognition
/// requests to a session, state feedback to the status renderer.
///
/// The dispatcher is the only writer on the link.
pub struct Dispatcher<L: SerialLink, R: RecognitionService> {
    link: L,
    recognition: R,
    events: Sender<PanelEvent>,
}

impl<L: SerialLink, R: RecognitionService> Dispatcher<L, R> {
    pub fn new(link: L, recognition: R, events: Sender<PanelEvent>) -> Self {
        Self { link, recognition, events }
    }

    /// Blocking dispatch loop. Ends when the link closes or errors; the
    /// panel is told to shut down either way.
    pub fn run(&mut self) -> Result<()> {
        let result = self.dispatch_loop();
        let _ = self.events.send(PanelEvent::Shutdown);
        result
    }

    fn dispatch_loop(&mut self) -> Result<()> {
        loop {
            let line = match self.link.read_line() {
                Ok(line) => line,
                Err(e) => {
                    tracing::info!("Serial link ended: {}", e);
                    return Ok(());
                }
            };

            match decode(&line) {
                InboundMessage::AlarmActive => self.handle_alarm()?,
                InboundMessage::FacialRecognitionRequest => self.handle_recognition()?,
                InboundMessage::StateFeedback(bits) => {
                    let snapshot = StatusSnapshot::decode(bits);
                    if self.events.send(PanelEvent::Status(snapshot)).is_err() {
                        // Render activity is gone; nothing left to drive
                        return Ok(());
                    }
                }
                InboundMessage::Unknown => {
                    tracing::trace!("Ignoring unrecognised line: {:?}", line);
                }
            }
        }
    }

    fn handle_alarm(&mut self) -> Result<()> {
        let (decision_tx, decision_rx) = bounded(1);
        if self
            .events
            .send(PanelEvent::AlarmRaised { decision: decision_tx })
            .is_err()
        {
            return Ok(());
        }

        // One-shot: blocks dispatch until the operator answers
        match decision_rx.recv() {
            Ok(AlarmDecision::Abort) => self.link.write_line(wire::ABORT),
            Ok(AlarmDecision::Ignore) | Err(_) => Ok(()),
        }
    }

    fn handle_recognition(&mut self) -> Result<()> {
        match self.recognition.run_session() {
            LoopOutcome::Success { names } => {
                let name = names.first().map(String::as_str).unwrap_or(UNAUTHORISED);
                self.link.write_line(name)
            }
            LoopOutcome::Aborted => self.link.write_line(UNAUTHORISED),
            LoopOutcome::Failed(e) => {
                tracing::error!("Recognition session failed: {}", e);
                self.link.write_line(wire::ERROR)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::error::PanelError;
    use crossbeam_channel::unbounded;
    use std::collections::VecDeque;

    /// In-memory link: scripted inbound lines, captured outbound lines.
    struct ScriptedLink {
        inbound: VecDeque<String>,
        written: Vec<String>,
    }

    impl ScriptedLink {
        fn new(inbound: &[&str]) -> Self {
            Self {
                inbound: inbound.iter().map(|s| s.to_string()).collect(),
                written: Vec::new(),
            }
        }
    }

    impl SerialLink for ScriptedLink {
        fn read_line(&mut self) -> Result<String> {
            self.inbound
                .pop_front()
                .ok_or_else(|| PanelError::Link("Link closed".into()))
        }

        fn write_line(&mut self, message: &str) -> Result<()> {
            self.written.push(message.to_string());
            Ok(())
        }
    }

    struct ScriptedRecognition {
        outcomes: Vec<LoopOutcome>,
        sessions: usize,
    }

    impl ScriptedRecognition {
        fn new(outcomes: Vec<LoopOutcome>) -> Self {
            Self { outcomes, sessions: 0 }
        }
    }

    impl RecognitionService for ScriptedRecognition {
        fn run_session(&mut self) -> LoopOutcome {
            self.sessions += 1;
            if self.outcomes.is_empty() {
                LoopOutcome::Aborted
            } else {
                self.outcomes.remove(0)
            }
        }
    }

    fn run_dispatcher(
        inbound: &[&str],
        recognition: ScriptedRecognition,
        alarm_answer: Option<AlarmDecision>,
    ) -> (Vec<String>, Vec<PanelEvent>, usize) {
        let link = ScriptedLink::new(inbound);
        let (event_tx, event_rx) = unbounded();

        // Answer alarm prompts the way the panel thread would
        let answerer = std::thread::spawn({
            move || {
                let mut seen = Vec::new();
                for event in event_rx.iter() {
                    if let PanelEvent::AlarmRaised { decision } = &event {
                        if let Some(answer) = alarm_answer {
                            decision.send(answer).unwrap();
                        }
                    }
                    let done = matches!(event, PanelEvent::Shutdown);
                    seen.push(event);
                    if done {
                        break;
                    }
                }
                seen
            }
        });

        let mut dispatcher = Dispatcher::new(link, recognition, event_tx);
        dispatcher.run().unwrap();

        let events = answerer.join().unwrap();
        let written = dispatcher.link.written.clone();
        (written, events, dispatcher.recognition.sessions)
    }

    #[test]
    fn alarm_abort_writes_abort() {
        let (written, _events, _sessions) = run_dispatcher(
            &["AlarmActive"],
            ScriptedRecognition::new(vec![]),
            Some(AlarmDecision::Abort),
        );
        assert_eq!(written, vec!["Abort"]);
    }

    #[test]
    fn alarm_ignored_writes_nothing() {
        let (written, _events, _sessions) = run_dispatcher(
            &["AlarmActive"],
            ScriptedRecognition::new(vec![]),
            Some(AlarmDecision::Ignore),
        );
        assert!(written.is_empty());
    }

    #[test]
    fn recognition_success_writes_the_name() {
        let (written, _events, sessions) = run_dispatcher(
            &["FacialRecognitionRequest"],
            ScriptedRecognition::new(vec![LoopOutcome::Success {
                names: vec!["alice".into(), "bob".into()],
            }]),
            None,
        );
        assert_eq!(written, vec!["alice"]);
        assert_eq!(sessions, 1);
    }

    #[test]
    fn recognition_abort_writes_unauthorised() {
        let (written, _events, _sessions) = run_dispatcher(
            &["FacialRecognitionRequest"],
            ScriptedRecognition::new(vec![LoopOutcome::Aborted]),
            None,
        );
        assert_eq!(written, vec!["Unauthorised"]);
    }

    #[test]
    fn recognition_failure_writes_error() {
        let (written, _events, _sessions) = run_dispatcher(
            &["FacialRecognitionRequest"],
            ScriptedRecognition::new(vec![LoopOutcome::Failed(PanelError::CameraUnavailable(
                "gone".into(),
            ))]),
            None,
        );
        assert_eq!(written, vec!["Error"]);
    }

    #[test]
    fn state_feedback_reaches_the_panel() {
        let (written, events, _sessions) =
            run_dispatcher(&["1000000100"], ScriptedRecognition::new(vec![]), None);
        assert!(written.is_empty());

        let statuses: Vec<&StatusSnapshot> = events
            .iter()
            .filter_map(|e| match e {
                PanelEvent::Status(snapshot) => Some(snapshot),
                _ => None,
            })
            .collect();
        assert_eq!(statuses.len(), 1);
        assert!(statuses[0].motion);
    }

    #[test]
    fn unknown_lines_are_silently_ignored() {
        let (written, events, sessions) = run_dispatcher(
            &["garbage", "", "01010"],
            ScriptedRecognition::new(vec![]),
            None,
        );
        assert!(written.is_empty());
        assert_eq!(sessions, 0);
        // Only the shutdown notice reached the panel
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], PanelEvent::Shutdown));
    }

    #[test]
    fn link_eof_shuts_the_panel_down() {
        let (_written, events, _sessions) =
            run_dispatcher(&[], ScriptedRecognition::new(vec![]), None);
        assert!(matches!(events.last(), Some(PanelEvent::Shutdown)));
    }

    #[test]
    fn mixed_traffic_is_routed_in_order() {
        let (written, events, sessions) = run_dispatcher(
            &["0000000100", "FacialRecognitionRequest", "AlarmActive"],
            ScriptedRecognition::new(vec![LoopOutcome::Success { names: vec!["carol".into()] }]),
            Some(AlarmDecision::Abort),
        );
        assert_eq!(written, vec!["carol", "Abort"]);
        assert_eq!(sessions, 1);
        assert!(matches!(events[0], PanelEvent::Status(_)));
    }
}
