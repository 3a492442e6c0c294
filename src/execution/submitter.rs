use std::sync::Arc;

use super::leverage_cache::LeverageCache;
use super::order_builder::execution_rank;
use crate::api::OrderGateway;
use crate::models::{ExecutionResult, OrderInstruction};

/// Sends validated orders to the venue one at a time.
///
/// Each order is isolated: a failed leverage sync or rejected placement is
/// recorded in its own result and the next order is still attempted.
pub struct OrderSubmitter {
    gateway: Arc<dyn OrderGateway>,
    leverage_cache: Arc<LeverageCache>,
    dry_run: bool,
}

impl OrderSubmitter {
    pub fn new(gateway: Arc<dyn OrderGateway>, leverage_cache: Arc<LeverageCache>) -> Self {
        Self {
            gateway,
            leverage_cache,
            dry_run: false,
        }
    }

    /// Log orders instead of sending them
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    /// Submit orders closes first, then sell-direction opens, then buy-direction opens
    pub async fn execute(&self, mut orders: Vec<OrderInstruction>) -> Vec<ExecutionResult> {
        orders.sort_by_key(execution_rank);

        let mut results = Vec::with_capacity(orders.len());
        for order in orders {
            results.push(self.submit_one(order).await);
        }
        results
    }

    async fn submit_one(&self, order: OrderInstruction) -> ExecutionResult {
        if self.dry_run {
            tracing::info!(
                "  → Would {} {} {} @ {} (lev {}x, reduce_only={})",
                order.side.as_str(),
                order.quantity,
                order.symbol,
                order.price,
                order.leverage,
                order.reduce_only
            );
            return ExecutionResult {
                order_id: Some(format!("dry-run-{}", order.client_order_id)),
                order,
                error: None,
            };
        }

        if !order.reduce_only {
            if let Err(e) = self
                .leverage_cache
                .ensure_leverage(self.gateway.as_ref(), &order.symbol, order.leverage)
                .await
            {
                tracing::error!(
                    "  ✗ Leverage sync failed for {} ({}x): {}",
                    order.symbol,
                    order.leverage,
                    e
                );
                return ExecutionResult {
                    order,
                    order_id: None,
                    error: Some(format!("leverage sync failed: {}", e)),
                };
            }
        }

        match self.gateway.place_order(&order).await {
            Ok(order_id) => {
                tracing::info!(
                    "  ✓ {} {} {} @ {} accepted (order {})",
                    order.side.as_str(),
                    order.quantity,
                    order.symbol,
                    order.price,
                    order_id
                );
                ExecutionResult {
                    order,
                    order_id: Some(order_id),
                    error: None,
                }
            }
            Err(e) => {
                tracing::error!(
                    "  ✗ {} {} {} failed: {}",
                    order.side.as_str(),
                    order.quantity,
                    order.symbol,
                    e
                );
                ExecutionResult {
                    order,
                    order_id: None,
                    error: Some(e.to_string()),
                }
            }
        }
    }
}
