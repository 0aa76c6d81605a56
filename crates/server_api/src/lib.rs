use shared::{
    domain::ReorderStrategy,
    error::{ApiError, StoreError},
    protocol::{
        BatchRequest, ItemPage, ReorderRequest, SelectRequest, StatusResponse, SuccessResponse,
    },
};
use storage::{OrderedStore, PersistenceController};
use tracing::{debug, warn};

pub const DEFAULT_LIMIT: usize = 20;
pub const DEFAULT_MAX_PAGE_SIZE: usize = 1000;

#[derive(Clone)]
pub struct ApiContext {
    pub store: OrderedStore,
    pub persistence: PersistenceController,
    pub reorder_strategy: ReorderStrategy,
    pub max_page_size: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageParams {
    pub offset: usize,
    pub limit: usize,
}

impl PageParams {
    /// Lenient parsing: anything unreadable or out of range falls back to
    /// offset 0 / limit 20, and the limit is capped at `max_page_size`.
    pub fn parse(offset: Option<&str>, limit: Option<&str>, max_page_size: usize) -> Self {
        let offset = offset
            .and_then(parse_int)
            .filter(|value| *value >= 0)
            .map(|value| value as usize)
            .unwrap_or(0);
        let limit = limit
            .and_then(parse_int)
            .filter(|value| *value > 0)
            .map(|value| value as usize)
            .unwrap_or(DEFAULT_LIMIT)
            .min(max_page_size.max(1));
        Self { offset, limit }
    }
}

fn parse_int(raw: &str) -> Option<i64> {
    raw.trim().parse::<i64>().ok()
}

pub async fn list_items(
    ctx: &ApiContext,
    search: Option<&str>,
    offset: Option<&str>,
    limit: Option<&str>,
) -> ItemPage {
    let page = PageParams::parse(offset, limit, ctx.max_page_size);
    ctx.store
        .query(search.unwrap_or_default(), page.offset, page.limit)
        .await
}

pub async fn select_item(
    ctx: &ApiContext,
    req: SelectRequest,
) -> Result<SuccessResponse, ApiError> {
    ctx.store.set_selected(&req.id, req.selected).await?;
    Ok(SuccessResponse::ok())
}

pub async fn reorder_items(
    ctx: &ApiContext,
    req: ReorderRequest,
) -> Result<SuccessResponse, ApiError> {
    ctx.store
        .reorder(&req.id1, &req.id2, ctx.reorder_strategy)
        .await?;
    Ok(SuccessResponse::ok())
}

pub fn parse_batch(body: &[u8]) -> Result<BatchRequest, StoreError> {
    serde_json::from_slice(body)
        .map_err(|e| StoreError::MalformedInput(format!("batch payload: {e}")))
}

pub async fn apply_batch(ctx: &ApiContext, body: &[u8]) -> Result<SuccessResponse, ApiError> {
    let batch = parse_batch(body)?;
    let outcome = ctx.store.apply_batch(&batch.items).await;
    if outcome.applied < batch.items.len() {
        debug!(
            applied = outcome.applied,
            skipped = batch.items.len() - outcome.applied,
            "batch referenced unknown items"
        );
    }
    if let Some(violation) = outcome.violation {
        warn!(%violation, "batch accepted but left positions out of order");
    }
    Ok(SuccessResponse::ok())
}

pub async fn service_status(ctx: &ApiContext) -> StatusResponse {
    StatusResponse {
        item_count: ctx.store.len().await,
        selected_count: ctx.store.selected_count().await,
        reorder_strategy: ctx.reorder_strategy.to_string(),
        persistence: ctx.persistence.status().await,
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
