use futures::StreamExt;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;

use parley_core::logging::{self, redact_content};
use parley_core::*;
use parley_providers::{CompletionResponse, Provider, build_request};

/// Where the stream consumer is in its request lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConsumerState {
    #[default]
    Idle,
    /// Request issued, nothing received yet
    Sending,
    /// Applying incremental chunks
    Streaming,
    /// Response over, telemetry being finalized
    Finalizing,
}

/// How a request ended when it did not fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Response fully applied
    Completed { units: u64 },
    /// Cancelled by the caller; the partial turn is kept as-is
    Cancelled { units: u64 },
}

impl SendOutcome {
    /// Number of chunks merged before the request ended
    pub fn units(&self) -> u64 {
        match self {
            SendOutcome::Completed { units } | SendOutcome::Cancelled { units } => *units,
        }
    }
}

#[derive(Debug, Default)]
struct InFlight {
    state: ConsumerState,
    cancel: Option<CancellationToken>,
}

#[derive(Debug)]
struct Shared {
    store: Mutex<TranscriptStore>,
    telemetry: Mutex<TelemetryRecorder>,
    in_flight: Mutex<InFlight>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl Shared {
    fn store(&self) -> MutexGuard<'_, TranscriptStore> {
        lock(&self.store)
    }

    fn telemetry(&self) -> MutexGuard<'_, TelemetryRecorder> {
        lock(&self.telemetry)
    }

    fn state(&self) -> ConsumerState {
        lock(&self.in_flight).state
    }

    fn set_state(&self, state: ConsumerState) {
        lock(&self.in_flight).state = state;
    }

    fn cancel(&self) -> bool {
        match &lock(&self.in_flight).cancel {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }
}

/// Finalizes an in-flight request: finishes telemetry and returns the session to
/// Idle. Runs on every exit from `send`, including when its future is dropped, in
/// which case the request's token is cancelled as well.
struct InFlightGuard<'a> {
    shared: &'a Shared,
    telemetry: TelemetryHandle,
    settled: bool,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.shared.set_state(ConsumerState::Finalizing);
        self.shared.telemetry().finish(self.telemetry);

        let mut in_flight = lock(&self.shared.in_flight);
        if !self.settled
            && let Some(token) = in_flight.cancel.as_ref()
        {
            tracing::debug!("send dropped before completion");
            token.cancel();
        }
        in_flight.state = ConsumerState::Idle;
        in_flight.cancel = None;
    }
}

/// Cloneable handle for controlling a session from another task
#[derive(Debug, Clone)]
pub struct SessionHandle {
    shared: Arc<Shared>,
}

impl SessionHandle {
    /// Cancel the in-flight request, if any. Returns false when idle.
    pub fn cancel(&self) -> bool {
        self.shared.cancel()
    }

    pub fn state(&self) -> ConsumerState {
        self.shared.state()
    }
}

/// A conversation bound to a provider.
///
/// Owns the transcript and telemetry and drives one request at a time. Listener
/// callbacks run while the session holds its internal lock; they must not call
/// back into the session.
pub struct Session {
    provider: Arc<dyn Provider>,
    config: Config,
    shared: Arc<Shared>,
}

impl Session {
    pub fn new(provider: Arc<dyn Provider>, config: Config) -> Self {
        Self {
            provider,
            config,
            shared: Arc::new(Shared {
                store: Mutex::new(TranscriptStore::new()),
                telemetry: Mutex::new(TelemetryRecorder::new()),
                in_flight: Mutex::new(InFlight::default()),
            }),
        }
    }

    /// Seed the transcript
    pub fn with_turns(self, turns: Vec<Turn>) -> Self {
        *self.shared.store() = TranscriptStore::with_turns(turns);
        self
    }

    /// Use a specific clock for telemetry
    pub fn with_clock(self, clock: Arc<dyn Clock>) -> Self {
        *self.shared.telemetry() = TelemetryRecorder::with_clock(clock);
        self
    }

    pub fn handle(&self) -> SessionHandle {
        SessionHandle { shared: Arc::clone(&self.shared) }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Settings apply from the next `send`
    pub fn set_config(&mut self, config: Config) {
        self.config = config;
    }

    pub fn state(&self) -> ConsumerState {
        self.shared.state()
    }

    pub fn transcript(&self) -> Vec<Turn> {
        self.shared.store().turns().to_vec()
    }

    pub fn telemetry(&self) -> Option<TelemetrySample> {
        self.shared.telemetry().sample().cloned()
    }

    pub fn on_transcript_changed(&self, listener: impl Fn(&[Turn]) + Send + Sync + 'static) -> SubscriptionId {
        self.shared.store().subscribe(listener)
    }

    pub fn off_transcript_changed(&self, id: SubscriptionId) -> bool {
        self.shared.store().unsubscribe(id)
    }

    pub fn on_telemetry_changed(
        &self, listener: impl Fn(Option<&TelemetrySample>) + Send + Sync + 'static,
    ) -> SubscriptionId {
        self.shared.telemetry().subscribe(listener)
    }

    pub fn off_telemetry_changed(&self, id: SubscriptionId) -> bool {
        self.shared.telemetry().unsubscribe(id)
    }

    /// Drop the telemetry sample once it no longer needs displaying
    pub fn clear_telemetry(&self) {
        self.shared.telemetry().clear();
    }

    pub fn append_turn(&self, turn: Turn) {
        self.shared.store().append(turn);
    }

    pub fn insert_turn(&self, index: usize, turn: Turn) -> Result<()> {
        Ok(self.shared.store().insert_at(index, turn)?)
    }

    pub fn replace_turn(&self, index: usize, turn: Turn) -> Result<()> {
        Ok(self.shared.store().replace_at(index, turn)?)
    }

    pub fn remove_turn(&self, index: usize) -> Result<Turn> {
        Ok(self.shared.store().remove_at(index)?)
    }

    /// Edit a turn in place with one of the [`Turn`] edit helpers.
    ///
    /// During a stream this races with merges on a last-write-wins basis.
    pub fn edit_turn<R>(&self, index: usize, edit: impl FnOnce(&mut Turn) -> R) -> Result<R> {
        let mut store = self.shared.store();
        let mut turn = store
            .turns()
            .get(index)
            .cloned()
            .ok_or_else(|| TranscriptError::out_of_bounds(index, store.len()))?;
        let result = edit(&mut turn);
        store.replace_at(index, turn)?;
        Ok(result)
    }

    /// Cancel the in-flight request, if any. Returns false when idle.
    pub fn cancel(&self) -> bool {
        self.shared.cancel()
    }

    /// Send the current transcript and fold the reply into a new assistant turn.
    ///
    /// Cancellation is not an error: it yields [`SendOutcome::Cancelled`]. On a
    /// transport or merge error the partially assembled turn is kept and the
    /// error is returned. Either way the session is idle again afterwards.
    pub async fn send(&self) -> Result<SendOutcome> {
        let cancel = {
            let mut in_flight = lock(&self.shared.in_flight);
            if in_flight.state != ConsumerState::Idle {
                return Err(Error::RequestInFlight);
            }
            let token = CancellationToken::new();
            in_flight.state = ConsumerState::Sending;
            in_flight.cancel = Some(token.clone());
            token
        };

        let request = {
            let mut store = self.shared.store();
            let request = build_request(store.turns(), &self.config);
            store.append(Turn::pending());
            request
        };
        let handle = self.shared.telemetry().start();
        let mut guard = InFlightGuard { shared: &self.shared, telemetry: handle, settled: false };
        tracing::debug!(model = %request.model, messages = request.messages.len(), stream = request.stream, "request sent");

        let mut units = 0;
        let result = self.consume(request, &cancel, handle, &mut units).await;

        guard.settled = true;
        drop(guard);
        let sample = self.shared.telemetry().sample().cloned();

        let ttft_ms = sample.as_ref().and_then(|s| s.time_to_first_unit()).map(|d| d.num_milliseconds());
        match result {
            Ok(()) => {
                tracing::info!(units, ttft_ms, "response complete");
                Ok(SendOutcome::Completed { units })
            }
            Err(e) if e.is_cancellation() || cancel.is_cancelled() => {
                tracing::info!(units, "request cancelled");
                Ok(SendOutcome::Cancelled { units })
            }
            Err(e) => {
                tracing::warn!(units, error = %e, "request failed");
                Err(e)
            }
        }
    }

    async fn consume(
        &self, request: parley_providers::ChatCompletionRequest, cancel: &CancellationToken, handle: TelemetryHandle,
        units: &mut u64,
    ) -> Result<()> {
        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            response = self.provider.create_completion(request, cancel.clone()) => response?,
        };

        let mut stream = match response {
            CompletionResponse::Complete(message) => {
                self.shared.store().update_last(|turn| Ok::<_, Error>(apply_complete(turn, message)))?;
                return Ok(());
            }
            CompletionResponse::Stream(stream) => stream,
        };

        let privacy = logging::LoggingConfig::from(self.config.logging.clone()).privacy;
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                next = stream.next() => next,
            };
            let Some(chunk) = next else {
                return Ok(());
            };
            let chunk = chunk?;
            if *units == 0 {
                self.shared.set_state(ConsumerState::Streaming);
            }

            self.shared.telemetry().record_unit(handle);
            self.shared.store().update_last(|turn| apply_chunk(turn, &chunk).map_err(Error::from))?;
            *units += 1;
            if let StreamChunk::TextDelta { text } = &chunk {
                tracing::trace!(units = *units, delta = %redact_content(text, &privacy), "chunk merged");
            } else {
                tracing::trace!(units = *units, "chunk merged");
            }
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session").field("config", &self.config).field("shared", &self.shared).finish()
    }
}
