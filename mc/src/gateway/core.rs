//! Gateway - caller-facing facade
//!
//! Builds the extractor, aggregator, dispatcher and reaper from a config and
//! wires them together, then owns the receiver and reaper tasks.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::dispatcher::Dispatcher;
use crate::aggregator::{
    Aggregator, OutputProcessor, PositionOutputProcessor, ReleaseStrategy, SizeReleaseStrategy,
};
use crate::config::MuxConfig;
use crate::error::{CallResult, MuxError};
use crate::handler::{DiscardPolicy, FailOnDiscard};
use crate::key::{CorrelationStrategy, PrefixExtractor};
use crate::metrics::{Counters, MuxMetrics};
use crate::observer::{ConnectionObserver, LoggingObserver};
use crate::reaper::Reaper;
use crate::transport::{Transport, TransportEvent};

/// Handle for issuing multiplexed calls over one shared connection
///
/// Cheap to clone; all clones share the same engine.
#[derive(Clone)]
pub struct Gateway {
    dispatcher: Arc<Dispatcher>,
    config: MuxConfig,
    cancel: CancellationToken,
    tasks: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

/// Optional collaborators for [`Gateway`]; anything unset uses the config defaults
pub struct GatewayBuilder {
    config: MuxConfig,
    extractor: Option<Arc<dyn CorrelationStrategy>>,
    release: Option<Arc<dyn ReleaseStrategy>>,
    output: Option<Arc<dyn OutputProcessor>>,
    policy: Arc<dyn DiscardPolicy>,
    observer: Arc<dyn ConnectionObserver>,
}

impl GatewayBuilder {
    pub fn with_extractor(mut self, extractor: Arc<dyn CorrelationStrategy>) -> Self {
        self.extractor = Some(extractor);
        self
    }

    pub fn with_release_strategy(mut self, release: Arc<dyn ReleaseStrategy>) -> Self {
        self.release = Some(release);
        self
    }

    pub fn with_output_processor(mut self, output: Arc<dyn OutputProcessor>) -> Self {
        self.output = Some(output);
        self
    }

    pub fn with_discard_policy(mut self, policy: Arc<dyn DiscardPolicy>) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn ConnectionObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Wire the engine to a transport and start the receiver and reaper tasks
    ///
    /// Must be called inside a tokio runtime.
    pub fn start(
        self,
        transport: Arc<dyn Transport>,
        inbound: mpsc::Receiver<TransportEvent>,
    ) -> Result<Gateway, MuxError> {
        debug!(config = ?self.config, "GatewayBuilder::start: called");
        self.config.validate()?;

        let extractor = match self.extractor {
            Some(extractor) => extractor,
            None => Arc::new(PrefixExtractor::new(self.config.correlation_key_width)?),
        };
        let release = self
            .release
            .unwrap_or_else(|| Arc::new(SizeReleaseStrategy::new(self.config.release_group_size)));
        let output = self
            .output
            .unwrap_or_else(|| Arc::new(PositionOutputProcessor::new(self.config.output_index)));

        let counters = Arc::new(Counters::default());
        let aggregator = Arc::new(Aggregator::with_counters(
            release,
            output,
            self.config.group_timeout(),
            self.config.max_outstanding_groups,
            Arc::clone(&counters),
        ));
        let dispatcher = Arc::new(Dispatcher::new(
            extractor,
            Arc::clone(&aggregator),
            transport,
            self.policy,
            self.observer,
            self.config.max_outstanding_groups,
            counters,
        ));

        let cancel = CancellationToken::new();
        let reaper = Reaper::new(aggregator, dispatcher.clone(), self.config.reap_interval()).spawn(cancel.clone());
        let receiver = tokio::spawn(receive_loop(Arc::clone(&dispatcher), inbound, cancel.clone()));

        info!(
            key_width = self.config.correlation_key_width,
            group_timeout_ms = self.config.group_timeout_ms,
            release_group_size = self.config.release_group_size,
            "Gateway started"
        );

        Ok(Gateway {
            dispatcher,
            config: self.config,
            cancel,
            tasks: Arc::new(Mutex::new(vec![reaper, receiver])),
        })
    }
}

impl Gateway {
    /// Start configuring a gateway
    pub fn builder(config: MuxConfig) -> GatewayBuilder {
        GatewayBuilder {
            config,
            extractor: None,
            release: None,
            output: None,
            policy: Arc::new(FailOnDiscard),
            observer: Arc::new(LoggingObserver),
        }
    }

    /// Start a gateway with default strategies, failing discarded calls
    pub fn start(
        config: MuxConfig,
        transport: Arc<dyn Transport>,
        inbound: mpsc::Receiver<TransportEvent>,
    ) -> Result<Self, MuxError> {
        Self::builder(config).start(transport, inbound)
    }

    /// Send a request and wait up to `reply_timeout` for its result
    pub async fn call(&self, request: impl Into<Vec<u8>>, reply_timeout: Duration) -> CallResult {
        if self.cancel.is_cancelled() {
            return Err(MuxError::Transport("gateway shut down".to_string()));
        }
        self.dispatcher.call(request.into(), reply_timeout).await
    }

    /// Send a request using the configured reply timeout
    pub async fn send(&self, request: impl Into<Vec<u8>>) -> CallResult {
        self.call(request, self.config.reply_timeout()).await
    }

    /// Like [`send`](Self::send), decoding the reply as UTF-8
    pub async fn send_text(&self, request: &str) -> Result<String, MuxError> {
        let reply = self.send(request.as_bytes().to_vec()).await?;
        Ok(String::from_utf8_lossy(&reply).into_owned())
    }

    pub fn metrics(&self) -> MuxMetrics {
        self.dispatcher.metrics()
    }

    pub fn config(&self) -> &MuxConfig {
        &self.config
    }

    pub fn is_shut_down(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Stop the background tasks and fail every call still waiting
    pub async fn shutdown(&self) {
        debug!("Gateway::shutdown: called");
        self.cancel.cancel();

        let tasks: Vec<JoinHandle<()>> = match self.tasks.lock() {
            Ok(mut tasks) => tasks.drain(..).collect(),
            Err(poisoned) => poisoned.into_inner().drain(..).collect(),
        };
        for task in tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Gateway background task failed");
            }
        }

        let failed = self
            .dispatcher
            .fail_all(MuxError::Transport("gateway shut down".to_string()));
        info!(failed, "Gateway stopped");
    }
}

/// Single reader draining the transport's inbound events
async fn receive_loop(
    dispatcher: Arc<Dispatcher>,
    mut inbound: mpsc::Receiver<TransportEvent>,
    cancel: CancellationToken,
) {
    info!("Receiver started");
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            event = inbound.recv() => match event {
                Some(event) => dispatcher.handle_event(event),
                None => {
                    warn!("Inbound stream ended");
                    dispatcher.fail_all(MuxError::Transport("inbound stream ended".to_string()));
                    break;
                }
            },
        }
    }
    info!("Receiver stopped");
}
