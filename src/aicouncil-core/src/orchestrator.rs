//! Conversation orchestration logic.
//!
//! The driver runs as an actor task. Hosts talk to it through a
//! [`ConversationHandle`] and observe it through [`ConversationEvent`]s.
//! At most one step (a dispatch to a responder, or the side effects of an
//! accepted turn) is in flight at any time.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::context::build_turns;
use crate::error::CouncilError;
use crate::message::{MediaAttachment, MediaStatus, Message};
use crate::participant::Participant;
use crate::pipeline::{SideEffectPipeline, SideEffectRequest};
use crate::responder::{GenerationParams, ResponderFactory};
use crate::selection::SpeakerSelector;
use crate::settings::{ConversationSettings, TurnMode};

/// Callback for conversation events.
pub type ConversationCallback = Box<dyn Fn(ConversationEvent) + Send + Sync>;

/// Events emitted while a conversation runs.
#[derive(Debug, Clone)]
pub enum ConversationEvent {
    Started { topic: String },
    /// A participant has been asked for a turn.
    Typing { participant_id: String, name: String },
    TypingCleared,
    /// A turn was appended to the transcript.
    TurnRecorded(Message),
    /// Media was attached to a turn already recorded.
    MessageUpdated(Message),
    ParticipantStatsChanged { participant_id: String, message_count: u32 },
    /// A responder failed; an error turn has been recorded.
    Error {
        participant_id: String,
        name: String,
        message: String,
    },
    AwaitingManualSelection,
    Paused,
    Resumed,
    /// Something went wrong inside the driver itself.
    Notice(String),
    Stopped,
    Cleared,
}

/// Lifecycle of a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConversationState {
    #[default]
    Idle,
    Running,
    Paused,
    Stopped,
}

/// Counters and flags owned by the driver.
#[derive(Debug, Clone, Default)]
pub struct RunState {
    pub state: ConversationState,
    /// AI turns recorded so far, errors included.
    pub responses: u32,
    pub active_count: usize,
    pub awaiting_manual: bool,
    pub typing: bool,
}

impl RunState {
    pub fn round(&self) -> u32 {
        if self.active_count == 0 {
            return 1;
        }
        self.responses / self.active_count as u32 + 1
    }
}

/// Result of asking a responder for a turn.
#[derive(Debug)]
pub enum DispatchOutcome {
    Accepted(String),
    Failed(CouncilError),
}

#[derive(Debug)]
enum Command {
    Start(String),
    Pause,
    Resume,
    Interject(String),
    Stop,
    Clear,
    SelectManualSpeaker(String),
}

/// Configures a conversation and spawns its actor task.
pub struct ConversationDriver {
    roster: Vec<Participant>,
    settings: watch::Receiver<ConversationSettings>,
    responders: Arc<dyn ResponderFactory>,
    pipeline: SideEffectPipeline,
    selector: SpeakerSelector,
    callback: Option<ConversationCallback>,
}

impl ConversationDriver {
    /// Create a driver over the active members of `roster`.
    pub fn new(
        roster: Vec<Participant>,
        settings: watch::Receiver<ConversationSettings>,
        responders: Arc<dyn ResponderFactory>,
        pipeline: SideEffectPipeline,
    ) -> Result<Self, CouncilError> {
        let roster: Vec<Participant> = roster.into_iter().filter(|p| p.is_active).collect();
        if roster.is_empty() {
            return Err(CouncilError::NoActiveParticipants);
        }

        Ok(Self {
            roster,
            settings,
            responders,
            pipeline,
            selector: SpeakerSelector::new(),
            callback: None,
        })
    }

    /// Set a callback for conversation events.
    pub fn with_callback(mut self, callback: ConversationCallback) -> Self {
        self.callback = Some(callback);
        self
    }

    pub fn with_selector(mut self, selector: SpeakerSelector) -> Self {
        self.selector = selector;
        self
    }

    /// Start the actor task. The conversation stays idle until `start` is sent.
    pub fn spawn(self) -> ConversationHandle {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let run = RunState {
            active_count: self.roster.len(),
            ..Default::default()
        };

        let actor = ConversationActor {
            roster: self.roster,
            settings: self.settings,
            settings_open: true,
            responders: self.responders,
            pipeline: self.pipeline,
            selector: self.selector,
            callback: self.callback,
            commands: commands_rx,
            commands_open: true,
            history: Vec::new(),
            run,
            next_cycle: None,
            in_flight: None,
        };

        ConversationHandle {
            controller: ConversationController {
                commands: commands_tx,
            },
            task: tokio::spawn(actor.run()),
        }
    }
}

/// Cloneable sender of conversation commands.
#[derive(Debug, Clone)]
pub struct ConversationController {
    commands: mpsc::UnboundedSender<Command>,
}

impl ConversationController {
    pub fn start(&self, topic: impl Into<String>) {
        self.send(Command::Start(topic.into()));
    }

    pub fn pause(&self) {
        self.send(Command::Pause);
    }

    pub fn resume(&self) {
        self.send(Command::Resume);
    }

    pub fn interject(&self, text: impl Into<String>) {
        self.send(Command::Interject(text.into()));
    }

    pub fn stop(&self) {
        self.send(Command::Stop);
    }

    pub fn clear(&self) {
        self.send(Command::Clear);
    }

    pub fn select_manual_speaker(&self, participant_id: impl Into<String>) {
        self.send(Command::SelectManualSpeaker(participant_id.into()));
    }

    fn send(&self, command: Command) {
        if let Err(e) = self.commands.send(command) {
            debug!(command = ?e.0, "conversation already ended, command ignored");
        }
    }
}

/// Owner's handle to a running conversation.
pub struct ConversationHandle {
    controller: ConversationController,
    task: JoinHandle<Vec<Message>>,
}

impl ConversationHandle {
    /// A controller that can be moved to other tasks.
    pub fn controller(&self) -> ConversationController {
        self.controller.clone()
    }

    pub fn start(&self, topic: impl Into<String>) {
        self.controller.start(topic);
    }

    pub fn pause(&self) {
        self.controller.pause();
    }

    pub fn resume(&self) {
        self.controller.resume();
    }

    pub fn interject(&self, text: impl Into<String>) {
        self.controller.interject(text);
    }

    pub fn stop(&self) {
        self.controller.stop();
    }

    pub fn clear(&self) {
        self.controller.clear();
    }

    pub fn select_manual_speaker(&self, participant_id: impl Into<String>) {
        self.controller.select_manual_speaker(participant_id);
    }

    /// Wait for the conversation to stop and return its transcript.
    pub async fn finished(self) -> Vec<Message> {
        let ConversationHandle { controller, task } = self;
        let transcript = match task.await {
            Ok(transcript) => transcript,
            Err(e) => {
                warn!(error = %e, "conversation task ended abnormally");
                Vec::new()
            }
        };
        drop(controller);
        transcript
    }
}

struct InFlight {
    speaker: Participant,
    kind: StepKind,
}

enum StepKind {
    Dispatch(JoinHandle<DispatchOutcome>),
    SideEffects {
        message_id: Uuid,
        task: JoinHandle<MediaAttachment>,
    },
}

enum StepOutput {
    Dispatched(DispatchOutcome),
    Media(MediaAttachment),
}

struct ConversationActor {
    roster: Vec<Participant>,
    settings: watch::Receiver<ConversationSettings>,
    settings_open: bool,
    responders: Arc<dyn ResponderFactory>,
    pipeline: SideEffectPipeline,
    selector: SpeakerSelector,
    callback: Option<ConversationCallback>,
    commands: mpsc::UnboundedReceiver<Command>,
    commands_open: bool,
    history: Vec<Message>,
    run: RunState,
    next_cycle: Option<Instant>,
    in_flight: Option<InFlight>,
}

impl ConversationActor {
    async fn run(mut self) -> Vec<Message> {
        loop {
            let deadline = self.next_cycle;
            let idle = self.in_flight.is_none();

            tokio::select! {
                biased;

                command = self.commands.recv(), if self.commands_open => match command {
                    Some(command) => self.handle_command(command),
                    None => {
                        debug!("all handles dropped, stopping");
                        self.commands_open = false;
                        self.handle_command(Command::Stop);
                    }
                },
                output = join_step(&mut self.in_flight) => {
                    if let Some(step) = self.in_flight.take() {
                        self.complete_step(step.speaker, step.kind, output);
                    }
                },
                changed = self.settings.changed(), if self.settings_open => {
                    if changed.is_err() {
                        self.settings_open = false;
                    } else {
                        self.settings_changed();
                    }
                },
                _ = sleep_until_deadline(deadline), if idle && deadline.is_some() => {
                    self.next_cycle = None;
                    self.run_cycle();
                },
            }

            if self.run.state == ConversationState::Stopped && self.in_flight.is_none() {
                break;
            }
        }

        info!(turns = self.history.len(), "conversation ended");
        self.history
    }

    fn emit_event(&self, event: ConversationEvent) {
        if let Some(ref callback) = self.callback {
            callback(event);
        }
    }

    fn current_settings(&self) -> ConversationSettings {
        self.settings.borrow().clone()
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Start(topic) => self.start(topic),
            Command::Pause => self.pause(),
            Command::Resume => self.resume(),
            Command::Interject(text) => self.interject(text),
            Command::Stop => {
                if self.run.state == ConversationState::Stopped {
                    debug!("stop ignored, conversation already stopped");
                } else {
                    self.finish();
                }
            }
            Command::Clear => self.clear(),
            Command::SelectManualSpeaker(id) => self.select_manual_speaker(id),
        }
    }

    fn start(&mut self, topic: String) {
        if self.run.state != ConversationState::Idle {
            debug!(state = ?self.run.state, "start ignored, conversation already started");
            return;
        }

        info!(topic = %topic, participants = self.roster.len(), "starting conversation");
        self.history = vec![Message::user(topic.clone(), 1)];
        self.run.responses = 0;
        for participant in &mut self.roster {
            participant.message_count = 0;
        }
        self.run.state = ConversationState::Running;
        self.emit_event(ConversationEvent::Started { topic });

        let delay = self.current_settings().timings.start_delay;
        self.schedule(delay);
    }

    fn pause(&mut self) {
        if self.run.state != ConversationState::Running {
            debug!(state = ?self.run.state, "pause ignored");
            return;
        }

        self.run.state = ConversationState::Paused;
        self.run.awaiting_manual = false;
        self.next_cycle = None;
        self.emit_event(ConversationEvent::Paused);
    }

    fn resume(&mut self) {
        if self.run.state != ConversationState::Paused {
            debug!(state = ?self.run.state, "resume ignored");
            return;
        }

        self.run.state = ConversationState::Running;
        self.emit_event(ConversationEvent::Resumed);

        let delay = self.current_settings().timings.resume_delay;
        self.schedule(delay);
    }

    fn interject(&mut self, text: String) {
        if !matches!(
            self.run.state,
            ConversationState::Running | ConversationState::Paused
        ) {
            debug!(state = ?self.run.state, "interjection ignored");
            return;
        }

        let message = Message::user(text, self.run.round());
        self.history.push(message.clone());
        self.emit_event(ConversationEvent::TurnRecorded(message));

        if self.run.state == ConversationState::Paused {
            self.resume();
        }
    }

    fn clear(&mut self) {
        if self.in_flight.take().is_some() {
            debug!("discarding in-flight step");
        }
        self.history.clear();
        self.run.responses = 0;
        for participant in &mut self.roster {
            participant.message_count = 0;
        }
        self.clear_typing();
        self.run.awaiting_manual = false;
        self.next_cycle = None;
        self.run.state = ConversationState::Stopped;
        self.emit_event(ConversationEvent::Cleared);
    }

    fn select_manual_speaker(&mut self, participant_id: String) {
        if self.run.state != ConversationState::Running || !self.run.awaiting_manual {
            debug!(participant = %participant_id, "manual selection ignored, not awaiting a pick");
            return;
        }
        if !self.roster.iter().any(|p| p.id == participant_id) {
            warn!(participant = %participant_id, "manual selection ignored, unknown participant");
            return;
        }

        self.selector.set_manual_next_speaker(participant_id);
        self.run.awaiting_manual = false;
        self.run_cycle();
    }

    /// Stop for good: no further cycles, flags cleared.
    fn finish(&mut self) {
        self.run.state = ConversationState::Stopped;
        self.run.awaiting_manual = false;
        self.next_cycle = None;
        self.clear_typing();
        info!(responses = self.run.responses, "conversation stopped");
        self.emit_event(ConversationEvent::Stopped);
    }

    fn clear_typing(&mut self) {
        if self.run.typing {
            self.run.typing = false;
            self.emit_event(ConversationEvent::TypingCleared);
        }
    }

    fn schedule(&mut self, delay: Duration) {
        self.next_cycle = Some(Instant::now() + delay);
    }

    fn settings_changed(&mut self) {
        let mode = self.settings.borrow().turn_mode;
        if self.run.state == ConversationState::Running
            && self.run.awaiting_manual
            && mode != TurnMode::Manual
        {
            debug!(mode = %mode, "turn mode changed while awaiting a pick");
            self.run.awaiting_manual = false;
            self.schedule(Duration::ZERO);
        }
    }

    /// Select a speaker and dispatch the request.
    fn run_cycle(&mut self) {
        if self.run.state != ConversationState::Running || self.in_flight.is_some() {
            return;
        }

        let settings = self.current_settings();
        let Some(speaker) = self
            .selector
            .select_next(&self.history, &self.roster, settings.turn_mode)
            .cloned()
        else {
            if settings.turn_mode == TurnMode::Manual {
                self.run.awaiting_manual = true;
                self.emit_event(ConversationEvent::AwaitingManualSelection);
            } else {
                warn!(mode = %settings.turn_mode, "no speaker available");
            }
            return;
        };

        debug!(participant = %speaker.name, round = self.run.round(), "dispatching");
        let turns = build_turns(&self.history, &speaker, &self.roster, settings.style);
        let params = GenerationParams::for_participant(&speaker, settings.response_length);
        let model = speaker.binding.model.clone();
        let responder = self.responders.responder_for(&speaker);

        self.run.typing = true;
        self.emit_event(ConversationEvent::Typing {
            participant_id: speaker.id.clone(),
            name: speaker.name.clone(),
        });

        let task = tokio::spawn(async move {
            let result = match responder {
                Ok(responder) => responder.send_message(&turns, &model, params).await,
                Err(e) => Err(e),
            };
            match result {
                Ok(text) => DispatchOutcome::Accepted(text),
                Err(e) => DispatchOutcome::Failed(e),
            }
        });

        self.in_flight = Some(InFlight {
            speaker,
            kind: StepKind::Dispatch(task),
        });
    }

    fn complete_step(
        &mut self,
        speaker: Participant,
        kind: StepKind,
        output: Result<StepOutput, JoinError>,
    ) {
        match (kind, output) {
            (_, Err(e)) => self.step_fault(e),
            (StepKind::Dispatch(_), Ok(StepOutput::Dispatched(outcome))) => {
                self.complete_dispatch(speaker, outcome)
            }
            (StepKind::SideEffects { message_id, .. }, Ok(StepOutput::Media(media))) => {
                self.complete_side_effects(message_id, media)
            }
            _ => warn!("step finished with mismatched output"),
        }
    }

    fn step_fault(&mut self, error: JoinError) {
        warn!(error = %error, "conversation step failed");
        self.clear_typing();
        self.emit_event(ConversationEvent::Notice(format!(
            "A conversation step failed unexpectedly: {}",
            error
        )));

        if self.run.state == ConversationState::Running {
            self.run.state = ConversationState::Paused;
            self.run.awaiting_manual = false;
            self.next_cycle = None;
            self.emit_event(ConversationEvent::Paused);
        }
    }

    fn complete_dispatch(&mut self, speaker: Participant, outcome: DispatchOutcome) {
        self.clear_typing();
        let settings = self.current_settings();
        let stopped = self.run.state == ConversationState::Stopped;

        match outcome {
            DispatchOutcome::Accepted(text) => {
                let mut message = Message::ai(speaker.id.clone(), text, self.run.round());
                let request = SideEffectRequest {
                    message_id: message.id,
                    text: message.content.clone(),
                    speaker: speaker.clone(),
                };
                if !stopped && request.wants_video(&settings) {
                    message.video_status = Some(MediaStatus::Generating);
                }

                self.record_ai_turn(message);
                self.count_accepted(&speaker.id);

                if stopped {
                    debug!(participant = %speaker.name, "late response recorded after stop");
                    return;
                }

                let pipeline = self.pipeline.clone();
                let message_id = request.message_id;
                let task = tokio::spawn(async move { pipeline.run(&request, &settings).await });
                self.in_flight = Some(InFlight {
                    speaker,
                    kind: StepKind::SideEffects { message_id, task },
                });
            }
            DispatchOutcome::Failed(error) => {
                warn!(participant = %speaker.name, error = %error, "responder failed");
                let content = format!("[Error: {}]", error);
                let message = Message::ai(speaker.id.clone(), content, self.run.round());
                self.record_ai_turn(message);
                self.emit_event(ConversationEvent::Error {
                    participant_id: speaker.id.clone(),
                    name: speaker.name.clone(),
                    message: error.to_string(),
                });

                self.continue_after(settings.timings.error_backoff);
            }
        }
    }

    fn complete_side_effects(&mut self, message_id: Uuid, media: MediaAttachment) {
        if !media.is_empty() {
            if let Some(message) = self.history.iter_mut().find(|m| m.id == message_id) {
                message.attach_media(&media);
                let updated = message.clone();
                self.emit_event(ConversationEvent::MessageUpdated(updated));
            }
        }

        let delay = self.current_settings().timings.turn_delay;
        self.continue_after(delay);
    }

    /// Append an AI turn, accepted or errored. Both advance the round.
    fn record_ai_turn(&mut self, message: Message) {
        self.history.push(message.clone());
        self.emit_event(ConversationEvent::TurnRecorded(message));
        self.run.responses += 1;
    }

    /// Only accepted responses count toward a participant's stats.
    fn count_accepted(&mut self, participant_id: &str) {
        if let Some(participant) = self.roster.iter_mut().find(|p| p.id == participant_id) {
            participant.message_count += 1;
            let event = ConversationEvent::ParticipantStatsChanged {
                participant_id: participant.id.clone(),
                message_count: participant.message_count,
            };
            self.emit_event(event);
        }
    }

    /// Decide what follows a finished turn.
    fn continue_after(&mut self, delay: Duration) {
        if self.run.state == ConversationState::Stopped {
            return;
        }

        let settings = self.current_settings();
        if !settings.should_continue(self.run.responses, self.run.active_count) {
            info!(max_rounds = settings.max_rounds, "round limit reached");
            self.finish();
            return;
        }

        if self.run.state != ConversationState::Running {
            return;
        }

        if settings.turn_mode == TurnMode::Manual {
            self.run.awaiting_manual = true;
            self.emit_event(ConversationEvent::AwaitingManualSelection);
        } else {
            self.schedule(delay);
        }
    }
}

async fn join_step(in_flight: &mut Option<InFlight>) -> Result<StepOutput, JoinError> {
    match in_flight.as_mut().map(|step| &mut step.kind) {
        Some(StepKind::Dispatch(task)) => task.await.map(StepOutput::Dispatched),
        Some(StepKind::SideEffects { task, .. }) => task.await.map(StepOutput::Media),
        None => std::future::pending().await,
    }
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ChatTurn;
    use crate::participant::{Personality, Provider};
    use crate::pipeline::testing::{FakeAnimator, FakeAssets, RecordingSpeech};
    use crate::responder::AiResponder;
    use crate::settings::Timings;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tokio::sync::Notify;

    #[derive(Default)]
    struct MockFactory {
        fail: bool,
        panic: bool,
        gate: Option<Arc<Notify>>,
        /// Last context turn seen by each request.
        seen: Arc<Mutex<Vec<String>>>,
    }

    struct MockResponder {
        name: String,
        fail: bool,
        panic: bool,
        gate: Option<Arc<Notify>>,
        seen: Arc<Mutex<Vec<String>>>,
    }

    impl ResponderFactory for MockFactory {
        fn responder_for(
            &self,
            participant: &Participant,
        ) -> Result<Arc<dyn AiResponder>, CouncilError> {
            Ok(Arc::new(MockResponder {
                name: participant.name.clone(),
                fail: self.fail,
                panic: self.panic,
                gate: self.gate.clone(),
                seen: self.seen.clone(),
            }))
        }
    }

    #[async_trait]
    impl AiResponder for MockResponder {
        async fn test_connection(&self) -> bool {
            true
        }

        async fn send_message(
            &self,
            turns: &[ChatTurn],
            _model: &str,
            _params: GenerationParams,
        ) -> Result<String, CouncilError> {
            if let Some(last) = turns.last() {
                self.seen.lock().unwrap().push(last.content.clone());
            }
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            if self.panic {
                panic!("responder blew up");
            }
            if self.fail {
                return Err(CouncilError::ResponderError("boom".to_string()));
            }
            Ok(format!("{} has thoughts", self.name))
        }
    }

    fn roster() -> Vec<Participant> {
        vec![
            Participant::new("a", "Aria", Provider::OpenAI, "gpt-4o")
                .with_personality(Personality::Analytical),
            Participant::new("b", "Blaze", Provider::Anthropic, "claude-sonnet-4-20250514")
                .with_personality(Personality::Creative),
        ]
    }

    fn settings(turn_mode: TurnMode, max_rounds: u32) -> ConversationSettings {
        ConversationSettings {
            turn_mode,
            max_rounds,
            auto_play_voice: false,
            timings: Timings::immediate(),
            ..Default::default()
        }
    }

    fn spawn(
        roster: Vec<Participant>,
        settings: ConversationSettings,
        factory: MockFactory,
        pipeline: SideEffectPipeline,
    ) -> (
        ConversationHandle,
        mpsc::UnboundedReceiver<ConversationEvent>,
        watch::Sender<ConversationSettings>,
    ) {
        let (settings_tx, settings_rx) = watch::channel(settings);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let handle = ConversationDriver::new(roster, settings_rx, Arc::new(factory), pipeline)
            .unwrap()
            .with_selector(SpeakerSelector::with_seed(7))
            .with_callback(Box::new(move |event| {
                let _ = events_tx.send(event);
            }))
            .spawn();
        (handle, events_rx, settings_tx)
    }

    async fn wait_for(
        events: &mut mpsc::UnboundedReceiver<ConversationEvent>,
        mut predicate: impl FnMut(&ConversationEvent) -> bool,
    ) -> Vec<ConversationEvent> {
        let mut seen = Vec::new();
        loop {
            let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
                .await
                .expect("timed out waiting for event")
                .expect("event channel closed");
            let done = predicate(&event);
            seen.push(event);
            if done {
                return seen;
            }
        }
    }

    fn speakers(transcript: &[Message]) -> Vec<&str> {
        transcript.iter().filter_map(|m| m.participant_id()).collect()
    }

    #[tokio::test]
    async fn test_sequential_rounds_then_stop() {
        let (handle, mut events, _settings) = spawn(
            roster(),
            settings(TurnMode::Sequential, 2),
            MockFactory::default(),
            SideEffectPipeline::silent(),
        );
        handle.start("Is AI conscious?");
        let transcript = handle.finished().await;

        assert_eq!(transcript.len(), 5);
        assert!(!transcript[0].is_ai());
        assert_eq!(transcript[0].content, "Is AI conscious?");
        assert_eq!(speakers(&transcript), ["a", "b", "a", "b"]);
        assert_eq!(
            transcript.iter().map(|m| m.round).collect::<Vec<_>>(),
            [1, 1, 1, 2, 2]
        );

        let mut stopped = false;
        while let Ok(event) = events.try_recv() {
            stopped |= matches!(event, ConversationEvent::Stopped);
        }
        assert!(stopped);
    }

    #[tokio::test]
    async fn test_errors_become_turns_without_stats() {
        let factory = MockFactory {
            fail: true,
            ..Default::default()
        };
        let (handle, mut events, _settings) = spawn(
            roster(),
            settings(TurnMode::Sequential, 1),
            factory,
            SideEffectPipeline::silent(),
        );
        handle.start("Topic");
        let transcript = handle.finished().await;

        assert_eq!(transcript.len(), 3);
        assert_eq!(transcript[1].content, "[Error: Responder error: boom]");
        assert_eq!(speakers(&transcript), ["a", "b"]);

        let mut errors = 0;
        let mut stats = 0;
        while let Ok(event) = events.try_recv() {
            match event {
                ConversationEvent::Error { .. } => errors += 1,
                ConversationEvent::ParticipantStatsChanged { .. } => stats += 1,
                _ => {}
            }
        }
        assert_eq!(errors, 2);
        assert_eq!(stats, 0);
    }

    #[tokio::test]
    async fn test_accepted_turns_update_stats() {
        let (handle, mut events, _settings) = spawn(
            roster(),
            settings(TurnMode::Sequential, 2),
            MockFactory::default(),
            SideEffectPipeline::silent(),
        );
        handle.start("Topic");
        handle.finished().await;

        let mut counts = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let ConversationEvent::ParticipantStatsChanged {
                participant_id,
                message_count,
            } = event
            {
                counts.push((participant_id, message_count));
            }
        }
        assert_eq!(
            counts,
            [
                ("a".to_string(), 1),
                ("b".to_string(), 1),
                ("a".to_string(), 2),
                ("b".to_string(), 2)
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_turn_waits_error_backoff() {
        let factory = MockFactory {
            fail: true,
            ..Default::default()
        };
        let mut conversation = settings(TurnMode::Sequential, 1);
        conversation.timings.turn_delay = Duration::from_millis(50);
        conversation.timings.error_backoff = Duration::from_millis(2000);

        let (handle, _events, _settings) =
            spawn(roster(), conversation, factory, SideEffectPipeline::silent());
        let began = Instant::now();
        handle.start("Topic");
        let transcript = handle.finished().await;

        assert_eq!(speakers(&transcript), ["a", "b"]);
        let elapsed = began.elapsed();
        assert!(elapsed >= Duration::from_millis(2000), "elapsed {:?}", elapsed);
        assert!(elapsed < Duration::from_millis(2050), "elapsed {:?}", elapsed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_accepted_turn_waits_turn_delay() {
        let mut conversation = settings(TurnMode::Sequential, 1);
        conversation.timings.turn_delay = Duration::from_millis(50);
        conversation.timings.error_backoff = Duration::from_millis(2000);

        let (handle, _events, _settings) = spawn(
            roster(),
            conversation,
            MockFactory::default(),
            SideEffectPipeline::silent(),
        );
        let began = Instant::now();
        handle.start("Topic");
        handle.finished().await;

        let elapsed = began.elapsed();
        assert!(elapsed >= Duration::from_millis(50), "elapsed {:?}", elapsed);
        assert!(elapsed < Duration::from_millis(2000), "elapsed {:?}", elapsed);
    }

    #[tokio::test]
    async fn test_stop_records_late_turn_without_side_effects() {
        let gate = Arc::new(Notify::new());
        let factory = MockFactory {
            gate: Some(gate.clone()),
            ..Default::default()
        };
        let solo = vec![Participant::new("a", "Aria", Provider::OpenAI, "gpt-4o")
            .with_avatar("aria.png")];
        let speech = Arc::new(RecordingSpeech::default());
        let pipeline = SideEffectPipeline::silent()
            .with_speech(speech.clone(), speech.clone())
            .with_video(Arc::new(FakeAssets), Arc::new(FakeAnimator { fail: false }));
        let mut conversation = settings(TurnMode::Sequential, 0);
        conversation.auto_play_voice = true;
        conversation.talking_heads = true;

        let (handle, mut events, _settings) = spawn(solo, conversation, factory, pipeline);
        handle.start("Topic");
        wait_for(&mut events, |e| matches!(e, ConversationEvent::Typing { .. })).await;

        handle.stop();
        wait_for(&mut events, |e| matches!(e, ConversationEvent::Stopped)).await;
        gate.notify_one();
        let transcript = handle.finished().await;

        assert_eq!(speakers(&transcript), ["a"]);
        assert_eq!(transcript[1].content, "Aria has thoughts");
        assert_eq!(transcript[1].video_status, None);
        assert!(speech.spoken.lock().unwrap().is_empty());
        assert!(speech.played.lock().unwrap().is_empty());

        let mut updated = false;
        while let Ok(event) = events.try_recv() {
            updated |= matches!(event, ConversationEvent::MessageUpdated(_));
        }
        assert!(!updated);
    }

    #[tokio::test]
    async fn test_manual_failure_returns_to_awaiting_pick() {
        let factory = MockFactory {
            fail: true,
            ..Default::default()
        };
        let (handle, mut events, _settings) = spawn(
            roster(),
            settings(TurnMode::Manual, 0),
            factory,
            SideEffectPipeline::silent(),
        );
        handle.start("Topic");
        wait_for(&mut events, |e| {
            matches!(e, ConversationEvent::AwaitingManualSelection)
        })
        .await;

        handle.select_manual_speaker("a");
        let after = wait_for(&mut events, |e| {
            matches!(e, ConversationEvent::AwaitingManualSelection)
        })
        .await;
        assert!(after.iter().any(|e| matches!(e, ConversationEvent::Error { .. })));

        handle.stop();
        let transcript = handle.finished().await;
        assert_eq!(speakers(&transcript), ["a"]);
        assert!(transcript[1].content.starts_with("[Error:"));

        // no retry after the error turn
        let mut typing = after
            .iter()
            .filter(|e| matches!(e, ConversationEvent::Typing { .. }))
            .count();
        while let Ok(event) = events.try_recv() {
            typing += matches!(event, ConversationEvent::Typing { .. }) as usize;
        }
        assert_eq!(typing, 1);
    }

    #[tokio::test]
    async fn test_manual_mode_waits_for_a_pick() {
        let (handle, mut events, _settings) = spawn(
            roster(),
            settings(TurnMode::Manual, 0),
            MockFactory::default(),
            SideEffectPipeline::silent(),
        );
        handle.start("Topic");

        let before = wait_for(&mut events, |e| {
            matches!(e, ConversationEvent::AwaitingManualSelection)
        })
        .await;
        assert!(!before.iter().any(|e| matches!(e, ConversationEvent::Typing { .. })));

        handle.select_manual_speaker("nobody");
        handle.select_manual_speaker("b");
        let after = wait_for(&mut events, |e| {
            matches!(e, ConversationEvent::AwaitingManualSelection)
        })
        .await;
        let recorded: Vec<_> = after
            .iter()
            .filter_map(|e| match e {
                ConversationEvent::TurnRecorded(m) => m.participant_id().map(String::from),
                _ => None,
            })
            .collect();
        assert_eq!(recorded, ["b"]);

        handle.stop();
        let transcript = handle.finished().await;
        assert_eq!(speakers(&transcript), ["b"]);
    }

    #[tokio::test]
    async fn test_pause_lets_in_flight_turn_land() {
        let gate = Arc::new(Notify::new());
        let factory = MockFactory {
            gate: Some(gate.clone()),
            ..Default::default()
        };
        let (handle, mut events, _settings) = spawn(
            roster(),
            settings(TurnMode::Sequential, 0),
            factory,
            SideEffectPipeline::silent(),
        );
        handle.start("Topic");
        wait_for(&mut events, |e| matches!(e, ConversationEvent::Typing { .. })).await;

        handle.pause();
        wait_for(&mut events, |e| matches!(e, ConversationEvent::Paused)).await;
        gate.notify_one();
        wait_for(&mut events, |e| matches!(e, ConversationEvent::TurnRecorded(_))).await;

        handle.stop();
        let transcript = handle.finished().await;
        assert_eq!(speakers(&transcript), ["a"]);
    }

    #[tokio::test]
    async fn test_single_member_random() {
        let solo = vec![Participant::new("a", "Aria", Provider::OpenAI, "gpt-4o")];
        let (handle, _events, _settings) = spawn(
            solo,
            settings(TurnMode::Random, 3),
            MockFactory::default(),
            SideEffectPipeline::silent(),
        );
        handle.start("Alone");
        let transcript = handle.finished().await;
        assert_eq!(speakers(&transcript), ["a", "a", "a"]);
        assert_eq!(
            transcript.iter().map(|m| m.round).collect::<Vec<_>>(),
            [1, 1, 2, 3]
        );
    }

    #[tokio::test]
    async fn test_video_failure_still_speaks() {
        let solo = vec![Participant::new("a", "Aria", Provider::OpenAI, "gpt-4o")
            .with_avatar("aria.png")];
        let speech = Arc::new(RecordingSpeech::default());
        let pipeline = SideEffectPipeline::silent()
            .with_speech(speech.clone(), speech.clone())
            .with_video(Arc::new(FakeAssets), Arc::new(FakeAnimator { fail: true }));
        let mut conversation = settings(TurnMode::Sequential, 1);
        conversation.auto_play_voice = true;
        conversation.talking_heads = true;

        let (handle, mut events, _settings) =
            spawn(solo, conversation, MockFactory::default(), pipeline);
        handle.start("Topic");
        let transcript = handle.finished().await;

        assert_eq!(transcript[1].video_status, Some(MediaStatus::Failed));
        assert_eq!(speech.played.lock().unwrap().as_slice(), ["Aria"]);

        let mut statuses = Vec::new();
        while let Ok(event) = events.try_recv() {
            match event {
                ConversationEvent::TurnRecorded(m) | ConversationEvent::MessageUpdated(m) => {
                    statuses.push(m.video_status)
                }
                _ => {}
            }
        }
        assert_eq!(
            statuses,
            [Some(MediaStatus::Generating), Some(MediaStatus::Failed)]
        );
    }

    #[tokio::test]
    async fn test_interjection_resumes_and_reaches_context() {
        let factory = MockFactory::default();
        let seen = factory.seen.clone();
        let (handle, mut events, _settings) = spawn(
            roster(),
            settings(TurnMode::Sequential, 0),
            factory,
            SideEffectPipeline::silent(),
        );
        handle.start("Topic");
        handle.pause();
        wait_for(&mut events, |e| matches!(e, ConversationEvent::Paused)).await;

        handle.interject("What about cats?");
        wait_for(&mut events, |e| matches!(e, ConversationEvent::Resumed)).await;
        wait_for(&mut events, |e| {
            matches!(e, ConversationEvent::TurnRecorded(m) if m.is_ai())
        })
        .await;

        handle.stop();
        let transcript = handle.finished().await;
        assert_eq!(transcript[1].content, "What about cats?");
        assert!(!transcript[1].is_ai());
        assert_eq!(transcript[2].participant_id(), Some("a"));
        assert_eq!(seen.lock().unwrap()[0], "What about cats?");
    }

    #[tokio::test]
    async fn test_clear_wipes_transcript() {
        let (handle, mut events, _settings) = spawn(
            roster(),
            settings(TurnMode::Sequential, 0),
            MockFactory::default(),
            SideEffectPipeline::silent(),
        );
        handle.start("Topic");
        wait_for(&mut events, |e| {
            matches!(e, ConversationEvent::TurnRecorded(m) if m.is_ai())
        })
        .await;

        handle.clear();
        let transcript = handle.finished().await;
        assert!(transcript.is_empty());
    }

    #[tokio::test]
    async fn test_stop_before_start() {
        let (handle, mut events, _settings) = spawn(
            roster(),
            settings(TurnMode::Sequential, 0),
            MockFactory::default(),
            SideEffectPipeline::silent(),
        );
        handle.stop();
        handle.start("Too late");
        let transcript = handle.finished().await;

        assert!(transcript.is_empty());
        assert!(matches!(events.try_recv(), Ok(ConversationEvent::Stopped)));
    }

    #[tokio::test]
    async fn test_step_panic_pauses_conversation() {
        let factory = MockFactory {
            panic: true,
            ..Default::default()
        };
        let (handle, mut events, _settings) = spawn(
            roster(),
            settings(TurnMode::Sequential, 0),
            factory,
            SideEffectPipeline::silent(),
        );
        handle.start("Topic");
        let seen = wait_for(&mut events, |e| matches!(e, ConversationEvent::Paused)).await;
        assert!(seen.iter().any(|e| matches!(e, ConversationEvent::Notice(_))));

        handle.stop();
        let transcript = handle.finished().await;
        assert_eq!(transcript.len(), 1);
    }

    #[tokio::test]
    async fn test_switching_out_of_manual_mode_resumes_cycles() {
        let (handle, mut events, settings_tx) = spawn(
            roster(),
            settings(TurnMode::Manual, 1),
            MockFactory::default(),
            SideEffectPipeline::silent(),
        );
        handle.start("Topic");
        wait_for(&mut events, |e| {
            matches!(e, ConversationEvent::AwaitingManualSelection)
        })
        .await;

        settings_tx.send_modify(|s| s.turn_mode = TurnMode::Sequential);
        let transcript = handle.finished().await;
        assert_eq!(speakers(&transcript), ["a", "b"]);
    }

    #[test]
    fn test_no_active_participants() {
        let mut members = roster();
        for p in &mut members {
            p.is_active = false;
        }
        let (_tx, rx) = watch::channel(ConversationSettings::default());
        let result = ConversationDriver::new(
            members,
            rx,
            Arc::new(MockFactory::default()),
            SideEffectPipeline::silent(),
        );
        assert!(matches!(result, Err(CouncilError::NoActiveParticipants)));
    }

    #[test]
    fn test_round_formula() {
        let mut run = RunState {
            active_count: 3,
            ..Default::default()
        };
        assert_eq!(run.round(), 1);
        run.responses = 2;
        assert_eq!(run.round(), 1);
        run.responses = 3;
        assert_eq!(run.round(), 2);
        run.responses = 7;
        assert_eq!(run.round(), 3);
    }
}
