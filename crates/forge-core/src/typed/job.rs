//! Job trait: binds a payload type to a task_type.

use serde::Serialize;
use serde::de::DeserializeOwned;

/// A typed task payload.
///
/// ```ignore
/// #[derive(Serialize, Deserialize)]
/// struct PriceCheck { symbol: String }
///
/// impl Job for PriceCheck {
///     const TYPE: &'static str = "market.price_check.v1";
/// }
/// ```
///
/// Naming: `{namespace}.{action}.v{major}`.
pub trait Job: Serialize + DeserializeOwned + Send + Sync + 'static {
    const TYPE: &'static str;
}
