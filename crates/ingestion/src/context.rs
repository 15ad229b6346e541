//! Shared state handed to every connection task

use std::sync::Arc;

use can_decoder::DecoderContext;
use contracts::GatewayConfig;
use dispatcher::{BackpressureGate, RateLimiter};
use tp_assembly::TpReassembler;

use crate::stats::IngestionMetrics;

/// Everything a connection needs besides its own socket and buffer
#[derive(Clone)]
pub struct IngestContext {
    pub decoder: Arc<DecoderContext>,
    pub reassembler: Arc<TpReassembler>,
    pub gate: Arc<BackpressureGate>,
    pub rate_limiter: Arc<RateLimiter>,
    pub metrics: Arc<IngestionMetrics>,
    pub config: Arc<GatewayConfig>,
}

impl IngestContext {
    /// Build the shared components from `config` around an existing decoder
    pub fn new(config: GatewayConfig, decoder: Arc<DecoderContext>) -> Self {
        let reassembler = Arc::new(TpReassembler::new(&config.tp));
        let gate = Arc::new(BackpressureGate::new(&config.backpressure));
        let rate_limiter = Arc::new(RateLimiter::new(&config.rate_limit));
        Self {
            decoder,
            reassembler,
            gate,
            rate_limiter,
            metrics: Arc::new(IngestionMetrics::new()),
            config: Arc::new(config),
        }
    }

    /// Context with built-in dictionaries only
    pub fn with_builtin(config: GatewayConfig) -> Self {
        Self::new(config, Arc::new(DecoderContext::new()))
    }
}
