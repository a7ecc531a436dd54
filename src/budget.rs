//! Token budget allocation across context-window roles.
//!
//! Pure arithmetic, no I/O. The window is partitioned into fixed roles
//! (system prompt, conversation history, response buffer) and the dynamic
//! document role. Invariant: all terms are non-negative and
//! `system + history + buffer + document_allocated + slack == total_window`
//! where slack is the unused remainder of the document allocation.

use serde::Serialize;

use crate::config::BudgetConfig;

/// Resolved allocation for one request.
#[derive(Debug, Clone, Serialize)]
pub struct TokenBudget {
    pub total_window: usize,
    pub system_prompt: usize,
    pub conversation_history: usize,
    pub response_buffer: usize,
    /// Tokens actually granted to the document role.
    pub document_allocated: usize,
    /// Upper bound of the document role: `W − S − H − B`, clamped to ≥ 0.
    pub document_max: usize,
    /// Tokens the caller asked for before clamping.
    pub document_requested: usize,
    /// `round(100 · granted / max(requested, 1))`.
    pub utilization_pct: u32,
    pub truncated: bool,
}

/// Grant `min(requested, document_max)` tokens to the document role.
pub fn allocate(cfg: &BudgetConfig, requested: usize) -> TokenBudget {
    let document_max = cfg.document_max();
    let granted = requested.min(document_max);
    let utilization = (100.0 * granted as f64 / requested.max(1) as f64).round() as u32;

    TokenBudget {
        total_window: cfg.total_window,
        system_prompt: cfg.system_prompt,
        conversation_history: cfg.conversation_history,
        response_buffer: cfg.response_buffer,
        document_allocated: granted,
        document_max,
        document_requested: requested,
        utilization_pct: utilization,
        truncated: granted < requested,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> BudgetConfig {
        BudgetConfig {
            total_window: 200_000,
            system_prompt: 2_000,
            conversation_history: 10_000,
            response_buffer: 4_000,
        }
    }

    #[test]
    fn test_roles_sum_to_window() {
        let b = allocate(&cfg(), 50_000);
        assert_eq!(
            b.system_prompt + b.conversation_history + b.response_buffer + b.document_max,
            b.total_window
        );
        assert!(b.document_allocated <= b.document_max);
    }

    #[test]
    fn test_small_request_fully_granted() {
        let b = allocate(&cfg(), 1_234);
        assert_eq!(b.document_allocated, 1_234);
        assert!(!b.truncated);
        assert_eq!(b.utilization_pct, 100);
    }

    #[test]
    fn test_oversized_request_clamped() {
        let b = allocate(&cfg(), 500_000);
        assert_eq!(b.document_allocated, 184_000);
        assert!(b.truncated);
        assert_eq!(b.utilization_pct, 37); // round(100 * 184000 / 500000)
    }

    #[test]
    fn test_zero_request() {
        let b = allocate(&cfg(), 0);
        assert_eq!(b.document_allocated, 0);
        assert!(!b.truncated);
        assert_eq!(b.utilization_pct, 0);
    }

    #[test]
    fn test_reserved_exceeding_window_clamps_to_zero() {
        let tight = BudgetConfig {
            total_window: 10_000,
            system_prompt: 6_000,
            conversation_history: 6_000,
            response_buffer: 4_000,
        };
        let b = allocate(&tight, 100);
        assert_eq!(b.document_max, 0);
        assert_eq!(b.document_allocated, 0);
        assert!(b.truncated);
    }
}
