//! Pure, deterministic split of a required quantity across candidate lots.
//!
//! 1. Sort candidates (FEFO: expiry asc with undated last, receipt asc, id asc; FIFO: receipt, id).
//! 2. Single-lot fit: the first lot in sort order that covers the whole requirement takes it all.
//! 3. Otherwise consume lots whole, in order, until the requirement is met or lots run out.
//!
//! A residual shortage is part of the result, not an error.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use crate::repositories::lot_candidate_repository::{AllocationCandidate, AllocationPolicyKind};

/// Quantity assigned to one lot. `priority` is 1-based in consumption order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LotAllocation {
    pub lot_id: i64,
    pub quantity: Decimal,
    pub priority: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationOutcome {
    pub allocations: Vec<LotAllocation>,
    pub shortage: Decimal,
}

impl AllocationOutcome {
    pub fn allocated(&self) -> Decimal {
        self.allocations.iter().map(|a| a.quantity).sum()
    }

    pub fn is_split(&self) -> bool {
        self.allocations.len() > 1
    }
}

fn fefo_order(a: &AllocationCandidate, b: &AllocationCandidate) -> Ordering {
    let expiry = match (a.expiry_date, b.expiry_date) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    };
    expiry
        .then_with(|| a.receipt_date.cmp(&b.receipt_date))
        .then_with(|| a.lot_id.cmp(&b.lot_id))
}

fn fifo_order(a: &AllocationCandidate, b: &AllocationCandidate) -> Ordering {
    a.receipt_date
        .cmp(&b.receipt_date)
        .then_with(|| a.lot_id.cmp(&b.lot_id))
}

pub fn sort_candidates(candidates: &mut [AllocationCandidate], policy: AllocationPolicyKind) {
    match policy {
        AllocationPolicyKind::Fefo => candidates.sort_by(fefo_order),
        AllocationPolicyKind::Fifo => candidates.sort_by(fifo_order),
    }
}

pub fn allocate(
    required_qty: Decimal,
    candidates: &[AllocationCandidate],
    policy: AllocationPolicyKind,
) -> AllocationOutcome {
    if required_qty <= Decimal::ZERO {
        return AllocationOutcome {
            allocations: Vec::new(),
            shortage: Decimal::ZERO,
        };
    }

    let mut sorted: Vec<&AllocationCandidate> = candidates
        .iter()
        .filter(|c| c.available_qty > Decimal::ZERO)
        .collect();
    match policy {
        AllocationPolicyKind::Fefo => sorted.sort_by(|a, b| fefo_order(a, b)),
        AllocationPolicyKind::Fifo => sorted.sort_by(|a, b| fifo_order(a, b)),
    }

    // Touch as few lots as possible, even if an earlier lot could only cover part of it.
    if let Some(fit) = sorted.iter().find(|c| c.available_qty >= required_qty) {
        return AllocationOutcome {
            allocations: vec![LotAllocation {
                lot_id: fit.lot_id,
                quantity: required_qty,
                priority: 1,
            }],
            shortage: Decimal::ZERO,
        };
    }

    let mut remaining = required_qty;
    let mut allocations = Vec::new();
    for candidate in sorted {
        if remaining <= Decimal::ZERO {
            break;
        }
        let take = candidate.available_qty.min(remaining);
        allocations.push(LotAllocation {
            lot_id: candidate.lot_id,
            quantity: take,
            priority: allocations.len() as u32 + 1,
        });
        remaining -= take;
    }

    AllocationOutcome {
        allocations,
        shortage: remaining.max(Decimal::ZERO),
    }
}
