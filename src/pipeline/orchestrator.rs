//! Pipeline orchestration: builds the station chain and runs it for one call.
//!
//! ```text
//!            queue_frame                                         sink
//! TaskHandle ───────────▶ [station 0] ─▶ [station 1] ─▶ … ─▶ [station n] ─▶ PipelineTask
//!                              │  ▲            │  ▲                 │
//! PipelineTask ◀── upstream ───┘  └────────────┘  └─────────────────┘
//!      ▲
//!      └──────────── push_to_task (direct injection from any station)
//! ```

use crate::defaults;
use crate::error::{IntakeError, Result};
use crate::lifecycle::{LifecycleController, Trigger};
use crate::pipeline::error::{ErrorReporter, LogReporter};
use crate::pipeline::frame::Frame;
use crate::pipeline::station::{Interrupter, Packet, Station, StationLinks, StationRunner};
use crate::pipeline::transport::TransportEvent;
use crate::transcript::Transcript;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// How long teardown waits for station tasks after the terminal frame.
const JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Task-wide policy, configured once per call.
#[derive(Debug, Clone)]
pub struct PipelineParams {
    /// A new user turn aborts in-flight dialogue and synthesis output.
    pub allow_interruptions: bool,
    /// Capacity of every inter-station queue.
    pub channel_capacity: usize,
}

impl Default for PipelineParams {
    fn default() -> Self {
        Self {
            allow_interruptions: true,
            channel_capacity: defaults::CHANNEL_CAPACITY,
        }
    }
}

impl PipelineParams {
    pub fn with_interruptions(mut self, allow: bool) -> Self {
        self.allow_interruptions = allow;
        self
    }

    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity;
        self
    }
}

/// Type-erased station launcher, so the chain can hold mixed station types.
trait Launch: Send {
    fn name(&self) -> &'static str;
    fn launch(self: Box<Self>, links: StationLinks, reporter: Arc<dyn ErrorReporter>)
    -> StationRunner;
}

impl<S: Station> Launch for S {
    fn name(&self) -> &'static str {
        Station::name(self)
    }

    fn launch(
        self: Box<Self>,
        links: StationLinks,
        reporter: Arc<dyn ErrorReporter>,
    ) -> StationRunner {
        StationRunner::spawn(*self, links, reporter)
    }
}

/// Ordered list of stations, head first.
#[derive(Default)]
pub struct Pipeline {
    stations: Vec<Box<dyn Launch>>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a station at the tail.
    pub fn with_station<S: Station>(mut self, station: S) -> Self {
        self.stations.push(Box::new(station));
        self
    }

    pub fn len(&self) -> usize {
        self.stations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stations.is_empty()
    }

    /// Station names, head first.
    pub fn station_names(&self) -> Vec<&'static str> {
        self.stations.iter().map(|s| s.name()).collect()
    }
}

/// How a pipeline run finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// `End` travelled the whole chain.
    Ended,
    /// `Cancel` travelled the whole chain.
    Cancelled,
    /// The tail closed without a terminal frame.
    Closed,
}

/// Summary returned by [`PipelineTask::run`].
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSummary {
    pub outcome: RunOutcome,
    /// Data frames that left the tail of the chain.
    pub frames_out: usize,
    /// Interruption generation when the run finished.
    pub interruptions: u64,
}

/// Control surface for a running task.
#[derive(Debug, Clone)]
pub struct TaskHandle {
    head_tx: mpsc::Sender<Packet>,
    interrupter: Interrupter,
    allow_interruptions: bool,
}

impl TaskHandle {
    /// Queues a frame at the head of the chain, travelling downstream.
    ///
    /// `Interruption` frames are consumed here: they raise an interruption
    /// (when allowed) instead of travelling the chain.
    pub async fn queue_frame(&self, frame: Frame) -> Result<()> {
        if frame == Frame::Interruption {
            self.interrupt();
            return Ok(());
        }
        let generation = self.interrupter.generation();
        self.send(Packet::new(frame, generation)).await
    }

    pub async fn queue_frames(&self, frames: impl IntoIterator<Item = Frame>) -> Result<()> {
        for frame in frames {
            self.queue_frame(frame).await?;
        }
        Ok(())
    }

    /// Raises an interruption if the task allows them. Returns true if raised.
    pub fn interrupt(&self) -> bool {
        if self.allow_interruptions {
            self.interrupter.interrupt();
            true
        } else {
            false
        }
    }

    /// Graceful stop: `End` follows whatever is already queued.
    pub async fn end(&self) -> Result<()> {
        self.queue_frame(Frame::End).await
    }

    /// Immediate stop: queued data frames go stale and `Cancel` unwinds the
    /// chain. Bypasses the interruption policy.
    pub async fn cancel(&self) -> Result<()> {
        let generation = self.interrupter.interrupt();
        self.send(Packet::new(Frame::Cancel, generation)).await
    }

    /// Current interruption generation.
    pub fn generation(&self) -> u64 {
        self.interrupter.generation()
    }

    async fn send(&self, packet: Packet) -> Result<()> {
        self.head_tx
            .send(packet)
            .await
            .map_err(|_| IntakeError::Pipeline {
                message: "pipeline is no longer accepting frames".to_string(),
            })
    }
}

/// Owns one call's station chain from start to teardown.
pub struct PipelineTask {
    pipeline: Pipeline,
    params: PipelineParams,
    error_reporter: Arc<dyn ErrorReporter>,
    lifecycle: Option<Arc<LifecycleController>>,
    transcript: Option<Transcript>,
    interrupter: Interrupter,
    head_tx: mpsc::Sender<Packet>,
    head_rx: mpsc::Receiver<Packet>,
}

impl PipelineTask {
    pub fn new(pipeline: Pipeline, params: PipelineParams) -> Self {
        let (head_tx, head_rx) = mpsc::channel(params.channel_capacity.max(1));
        // Fresh channel with room for one: Start is always the first frame.
        if head_tx.try_send(Packet::new(Frame::Start, 0)).is_err() {
            tracing::error!("could not queue start frame");
        }
        Self {
            pipeline,
            params,
            error_reporter: Arc::new(LogReporter),
            lifecycle: None,
            transcript: None,
            interrupter: Interrupter::new(),
            head_tx,
            head_rx,
        }
    }

    /// Sets a custom error reporter.
    pub fn with_error_reporter(mut self, reporter: Arc<dyn ErrorReporter>) -> Self {
        self.error_reporter = reporter;
        self
    }

    /// Routes `ParticipantLeft` into this controller's disconnect trigger.
    pub fn with_lifecycle(mut self, lifecycle: Arc<LifecycleController>) -> Self {
        self.lifecycle = Some(lifecycle);
        self
    }

    /// Transcript snapshot queued on `ParticipantJoined` to open the call.
    pub fn with_transcript(mut self, transcript: Transcript) -> Self {
        self.transcript = Some(transcript);
        self
    }

    pub fn params(&self) -> &PipelineParams {
        &self.params
    }

    pub fn handle(&self) -> TaskHandle {
        TaskHandle {
            head_tx: self.head_tx.clone(),
            interrupter: self.interrupter.clone(),
            allow_interruptions: self.params.allow_interruptions,
        }
    }

    /// Runs the chain until `End` or `Cancel` reaches the sink.
    ///
    /// Transport lifecycle events are consumed from `events` for the
    /// duration of the run.
    pub async fn run(self, mut events: mpsc::Receiver<TransportEvent>) -> Result<SessionSummary> {
        if self.pipeline.is_empty() {
            return Err(IntakeError::Pipeline {
                message: "pipeline has no stations".to_string(),
            });
        }

        let handle = self.handle();
        let PipelineTask {
            pipeline,
            params,
            error_reporter,
            lifecycle,
            transcript,
            interrupter,
            head_tx: _,
            head_rx,
        } = self;

        let capacity = params.channel_capacity.max(1);
        let (task_tx, mut task_rx) = mpsc::channel::<Packet>(capacity);
        let (sink_tx, mut sink_rx) = mpsc::channel::<Packet>(capacity);

        tracing::info!(
            stations = ?pipeline.station_names(),
            allow_interruptions = params.allow_interruptions,
            "pipeline starting"
        );
        let runners = spawn_stations(
            pipeline,
            Links {
                head_rx,
                task_tx,
                sink_tx,
                capacity,
                interrupter: interrupter.clone(),
                allow_interruptions: params.allow_interruptions,
            },
            error_reporter,
        );

        let mut control = Control {
            handle,
            lifecycle,
            transcript,
            ending: false,
            cancelling: false,
            disconnect: None,
        };
        let mut frames_out = 0usize;
        let mut events_open = true;
        let mut task_open = true;

        let outcome = loop {
            tokio::select! {
                packet = sink_rx.recv() => match packet {
                    Some(Packet { frame: Frame::End, .. }) => break RunOutcome::Ended,
                    Some(Packet { frame: Frame::Cancel, .. }) => break RunOutcome::Cancelled,
                    Some(packet) => {
                        if !packet.frame.is_control() {
                            frames_out += 1;
                        }
                        tracing::trace!(kind = packet.frame.kind(), "frame reached sink");
                    }
                    None => break RunOutcome::Closed,
                },
                packet = task_rx.recv(), if task_open => match packet {
                    Some(packet) => control.upstream(packet.frame),
                    None => task_open = false,
                },
                event = events.recv(), if events_open => match event {
                    Some(event) => control.transport(event),
                    None => events_open = false,
                },
            }
        };

        tracing::info!(?outcome, frames_out, "pipeline finished");
        if let Some(disconnect) = control.disconnect.take()
            && let Err(e) = disconnect.await
        {
            tracing::error!(error = %e, "disconnect handling failed");
        }
        join_stations(runners).await;

        Ok(SessionSummary {
            outcome,
            frames_out,
            interruptions: interrupter.generation(),
        })
    }
}

/// Channel endpoints shared by every station of one run.
struct Links {
    head_rx: mpsc::Receiver<Packet>,
    task_tx: mpsc::Sender<Packet>,
    sink_tx: mpsc::Sender<Packet>,
    capacity: usize,
    interrupter: Interrupter,
    allow_interruptions: bool,
}

fn spawn_stations(
    pipeline: Pipeline,
    links: Links,
    reporter: Arc<dyn ErrorReporter>,
) -> Vec<StationRunner> {
    let count = pipeline.stations.len();
    let Links {
        head_rx,
        task_tx,
        sink_tx,
        capacity,
        interrupter,
        allow_interruptions,
    } = links;

    // Station i reads downstream queue i and upstream queue i; it writes
    // downstream queue i + 1 (the sink for the tail) and upstream queue i - 1
    // (the task for the head).
    let (inner_tx, inner_rx): (Vec<_>, Vec<_>) =
        (1..count).map(|_| mpsc::channel::<Packet>(capacity)).unzip();
    let (up_tx, up_rx): (Vec<_>, Vec<_>) =
        (0..count).map(|_| mpsc::channel::<Packet>(capacity)).unzip();

    let downstream_in = std::iter::once(head_rx).chain(inner_rx);
    let downstream_out = inner_tx.into_iter().chain(std::iter::once(sink_tx));
    // Nothing feeds the tail's upstream queue.
    let upstream_out =
        std::iter::once(task_tx.clone()).chain(up_tx.into_iter().take(count.saturating_sub(1)));

    pipeline
        .stations
        .into_iter()
        .zip(downstream_in)
        .zip(up_rx)
        .zip(downstream_out)
        .zip(upstream_out)
        .map(
            |((((station, downstream_in), upstream_in), downstream_out), upstream_out)| {
                let links = StationLinks {
                    downstream_in,
                    upstream_in,
                    downstream_out,
                    upstream_out,
                    task_tx: task_tx.clone(),
                    interrupter: interrupter.clone(),
                    allow_interruptions,
                };
                station.launch(links, reporter.clone())
            },
        )
        .collect()
}

async fn join_stations(runners: Vec<StationRunner>) {
    let deadline = tokio::time::Instant::now() + JOIN_TIMEOUT;
    for runner in runners {
        let name = runner.name();
        let abort = runner.abort_handle();
        match tokio::time::timeout_at(deadline, runner.join()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::error!(station = name, error = %e, "station task failed"),
            Err(_) => {
                tracing::warn!(station = name, "station did not stop in time, aborting");
                abort.abort();
            }
        }
    }
}

/// Reactions to upstream frames and transport events during a run.
struct Control {
    handle: TaskHandle,
    lifecycle: Option<Arc<LifecycleController>>,
    transcript: Option<Transcript>,
    ending: bool,
    cancelling: bool,
    disconnect: Option<JoinHandle<()>>,
}

impl Control {
    fn upstream(&mut self, frame: Frame) {
        match frame {
            Frame::End => self.end("end requested upstream"),
            Frame::Cancel => self.cancel("cancel requested upstream"),
            Frame::Error {
                message,
                fatal: true,
            } => {
                tracing::error!(error = %message, "fatal station error");
                self.cancel("cancelling after fatal error");
            }
            Frame::Error { message, .. } => tracing::warn!(error = %message, "station error"),
            Frame::Interruption => {
                self.handle.interrupt();
            }
            other => tracing::debug!(kind = other.kind(), "upstream frame left the chain"),
        }
    }

    fn transport(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::ParticipantJoined { participant_id } => {
                tracing::info!(%participant_id, "participant joined");
                if let Some(transcript) = &self.transcript {
                    spawn_queue(
                        self.handle.clone(),
                        Frame::DialogueTurns(transcript.snapshot()),
                    );
                }
            }
            TransportEvent::ParticipantLeft {
                participant_id,
                reason,
            } => {
                tracing::info!(%participant_id, ?reason, "participant left");
                if let Some(lifecycle) = &self.lifecycle
                    && self.disconnect.is_none()
                {
                    // Claimed before End is queued, so End never wins this race.
                    lifecycle.claim(Trigger::ParticipantLeft);
                    let lifecycle = lifecycle.clone();
                    self.disconnect = Some(tokio::spawn(async move {
                        lifecycle.finish().await;
                    }));
                }
                self.end("participant left, ending pipeline");
            }
        }
    }

    fn end(&mut self, why: &str) {
        if !std::mem::replace(&mut self.ending, true) && !self.cancelling {
            tracing::info!("{}", why);
            spawn_queue(self.handle.clone(), Frame::End);
        }
    }

    fn cancel(&mut self, why: &str) {
        if !std::mem::replace(&mut self.cancelling, true) {
            tracing::info!("{}", why);
            let handle = self.handle.clone();
            tokio::spawn(async move {
                if let Err(e) = handle.cancel().await {
                    tracing::debug!(error = %e, "could not queue cancel");
                }
            });
        }
    }
}

fn spawn_queue(handle: TaskHandle, frame: Frame) {
    // Detached so the run loop keeps draining the sink while the head is full.
    tokio::spawn(async move {
        if let Err(e) = handle.queue_frame(frame).await {
            tracing::debug!(error = %e, "could not queue frame");
        }
    });
}
