//! Tier trait for representing provider rate limits and pricing.

use lectern_core::TokenUsage;

/// Rate limiting constraints and pricing of a provider tier.
///
/// All methods return `Option<T>` where `None` means unlimited or unknown.
///
/// # Example
///
/// ```
/// use lectern_core::TokenUsage;
/// use lectern_rate_limit::Tier;
///
/// struct FlatTier;
///
/// impl Tier for FlatTier {
///     fn rpm(&self) -> Option<u32> { Some(10) }
///     fn tpm(&self) -> Option<u64> { None }
///     fn rpd(&self) -> Option<u32> { None }
///     fn max_concurrent(&self) -> Option<u32> { Some(1) }
///     fn cost_per_million_input_tokens(&self) -> Option<f64> { Some(1.0) }
///     fn cost_per_million_output_tokens(&self) -> Option<f64> { Some(2.0) }
///     fn name(&self) -> &str { "Flat" }
/// }
///
/// let cost = FlatTier.estimate_cost(&TokenUsage::new(1_000_000, 500_000));
/// assert_eq!(cost, Some(2.0));
/// ```
pub trait Tier: Send + Sync {
    /// Requests per minute limit.
    fn rpm(&self) -> Option<u32>;

    /// Tokens per minute limit.
    fn tpm(&self) -> Option<u64>;

    /// Requests per day limit.
    fn rpd(&self) -> Option<u32>;

    /// Maximum concurrent requests.
    fn max_concurrent(&self) -> Option<u32>;

    /// Cost per million input tokens in USD.
    fn cost_per_million_input_tokens(&self) -> Option<f64>;

    /// Cost per million output tokens in USD.
    fn cost_per_million_output_tokens(&self) -> Option<f64>;

    /// Name of the tier (e.g., "Free", "Tier 1").
    fn name(&self) -> &str;

    /// Estimated cost of a call in USD.
    ///
    /// Returns `None` when the tier has no pricing at all; a missing price
    /// for one direction counts as free.
    fn estimate_cost(&self, usage: &TokenUsage) -> Option<f64> {
        let input = self.cost_per_million_input_tokens();
        let output = self.cost_per_million_output_tokens();
        if input.is_none() && output.is_none() {
            return None;
        }
        let cost = input.unwrap_or(0.0) * usage.input_tokens as f64 / 1_000_000.0
            + output.unwrap_or(0.0) * usage.output_tokens as f64 / 1_000_000.0;
        Some(cost.max(0.0))
    }
}
