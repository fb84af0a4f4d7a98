//! Rate node: owns the rate engine components and their background tasks.

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use ratekeeper_common::{CurrencyPair, FixedPointMoney};
use ratekeeper_fx::{
    ConversionEngine, ConversionRequest, ConversionResponse, EngineStats, RateScheduler,
    RateStore, RateValidationReport, UpstreamRateSource,
};

use crate::config::NodeConfig;
use crate::error::{NodeError, NodeResult};
use crate::state::NodeState;

/// A running rate engine instance.
pub struct RateNode {
    /// Current node state.
    state: RwLock<NodeState>,
    /// Tiered rate store shared by the scheduler and the engine.
    store: Arc<RateStore>,
    /// Conversion engine.
    engine: Arc<ConversionEngine>,
    /// Background refresh scheduler.
    scheduler: Arc<RateScheduler>,
    /// Parent token of every background task.
    cancel: CancellationToken,
    /// Handles of spawned background tasks.
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl RateNode {
    /// Create a node over `source`.
    pub fn new(config: NodeConfig, source: Arc<dyn UpstreamRateSource>) -> NodeResult<Self> {
        config.validate().map_err(NodeError::Config)?;

        let cancel = CancellationToken::new();
        let store = Arc::new(RateStore::with_config(config.store.clone()));
        let engine = Arc::new(ConversionEngine::new(
            store.clone(),
            source.clone(),
            config.engine.clone(),
        ));
        let scheduler = Arc::new(RateScheduler::new(
            store.clone(),
            source,
            config.scheduler.clone(),
            cancel.child_token(),
        ));

        Ok(Self {
            state: RwLock::new(NodeState::Starting),
            store,
            engine,
            scheduler,
            cancel,
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Start the scheduler and the cache sweepers.
    #[instrument(skip(self))]
    pub async fn start(&self) -> NodeResult<()> {
        {
            let mut state = self.state.write();
            if *state != NodeState::Starting {
                return Err(NodeError::InvalidState(*state, NodeState::Starting));
            }
            *state = NodeState::Running;
        }

        let mut tasks = self.tasks.lock();
        tasks.push(self.scheduler.start());
        tasks.push(self.store.spawn_sweeper(self.cancel.child_token()));
        tasks.push(
            self.engine
                .response_cache()
                .spawn_sweeper(self.cancel.child_token()),
        );

        info!(tasks = tasks.len(), "Rate node started");
        Ok(())
    }

    /// Stop all background tasks and wait for them to finish.
    #[instrument(skip(self))]
    pub async fn stop(&self) -> NodeResult<()> {
        if self.state().is_terminal() {
            return Ok(());
        }
        *self.state.write() = NodeState::ShuttingDown;

        self.cancel.cancel();
        let tasks = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Background task ended abnormally");
            }
        }

        *self.state.write() = NodeState::Stopped;
        info!("Rate node stopped");
        Ok(())
    }

    /// Convert an amount.
    pub async fn convert(&self, request: &ConversionRequest) -> NodeResult<ConversionResponse> {
        self.ensure_running()?;
        Ok(self.engine.convert(request).await?)
    }

    /// Best stored rate for a pair.
    pub fn precision_rate(&self, pair: &CurrencyPair) -> NodeResult<FixedPointMoney> {
        self.ensure_running()?;
        Ok(self.engine.precision_rate(pair)?)
    }

    /// Audit the stored base rates.
    pub fn validate_rates(&self) -> RateValidationReport {
        self.scheduler.validate_rates()
    }

    pub fn engine_stats(&self) -> EngineStats {
        self.engine.stats()
    }

    pub fn store(&self) -> &Arc<RateStore> {
        &self.store
    }

    /// Get the current node state.
    pub fn state(&self) -> NodeState {
        *self.state.read()
    }

    /// Check if the node is serving conversions.
    pub fn is_accepting_requests(&self) -> bool {
        self.state().accepts_requests()
    }

    fn ensure_running(&self) -> NodeResult<()> {
        let state = self.state();
        if !state.accepts_requests() {
            return Err(NodeError::InvalidState(state, NodeState::Running));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ratekeeper_common::Currency;
    use ratekeeper_fx::MockRateSource;
    use std::time::Duration;

    fn money(value: f64, scale: u32) -> FixedPointMoney {
        FixedPointMoney::from_decimal(value, scale).unwrap()
    }

    fn usd_to(code: &str) -> CurrencyPair {
        CurrencyPair::new(Currency::usd(), Currency::new(code))
    }

    fn create_test_node() -> (RateNode, Arc<MockRateSource>) {
        let source = Arc::new(MockRateSource::new("test"));
        source.set_rate(usd_to("EUR"), money(0.92, 6));
        source.set_rate(usd_to("GBP"), money(0.79, 6));
        let node = RateNode::new(NodeConfig::default(), source.clone()).unwrap();
        (node, source)
    }

    #[tokio::test]
    async fn test_node_creation() {
        let (node, source) = create_test_node();

        assert_eq!(node.state(), NodeState::Starting);
        assert!(!node.is_accepting_requests());
        assert_eq!(source.calls(), 0);
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let mut config = NodeConfig::default();
        config.upstream.base_url.clear();

        let result = RateNode::new(config, Arc::new(MockRateSource::new("test")));

        assert!(matches!(result, Err(NodeError::Config(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_node_start_stop() {
        let (node, _source) = create_test_node();

        node.start().await.unwrap();
        assert_eq!(node.state(), NodeState::Running);
        assert!(matches!(
            node.start().await,
            Err(NodeError::InvalidState(NodeState::Running, NodeState::Starting))
        ));

        node.stop().await.unwrap();
        assert_eq!(node.state(), NodeState::Stopped);
        node.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_convert_after_warm_up() {
        let (node, source) = create_test_node();
        node.start().await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;

        let request = ConversionRequest::new("EUR", "GBP", money(100.0, 2));
        let response = node.convert(&request).await.unwrap();

        // 0.79 / 0.92, derived during the warm-up base refresh
        assert_eq!(response.rate.to_decimal_string(), "0.858695");
        assert_eq!(source.calls_for(&CurrencyPair::new(Currency::eur(), Currency::gbp())), 0);
        assert_eq!(node.precision_rate(&usd_to("EUR")).unwrap(), money(0.92, 6));
        assert!(node.validate_rates().is_clean());

        node.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_requests_rejected_when_not_running() {
        let (node, _source) = create_test_node();
        let request = ConversionRequest::new("USD", "EUR", money(1.0, 2));

        let err = node.convert(&request).await.unwrap_err();

        assert!(matches!(err, NodeError::InvalidState(NodeState::Starting, NodeState::Running)));
        assert_eq!(err.error_code(), "NODE_UNAVAILABLE");
    }
}
