//! Batch allocation arithmetic used by the conductor.
//!
//! These functions only compute counts and indices; the conductor applies
//! them to real queues. Keeping them pure makes the fairness and
//! convergence properties directly testable.

/// Number of events to forward out of a batch of `batch` for a station with
/// prescale `prescale` whose tried counter stood at `tried` before the batch
///
/// The running counter makes forwarded totals exact: after any number of
/// batches exactly `floor(total_tried / prescale)` events have been forwarded.
pub fn prescale_quota(tried: u64, batch: u64, prescale: u32) -> u64 {
    let n = u64::from(prescale.max(1));
    (tried + batch) / n - tried / n
}

/// Whether the `index`-th event of a batch (0-based) is forwarded given the
/// tried counter before the batch
pub fn prescale_picks(tried: u64, index: u64, prescale: u32) -> bool {
    let n = u64::from(prescale.max(1));
    (tried + index + 1) % n == 0
}

/// How a round-robin batch is divided
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoundRobinPlan {
    /// `(sibling index, batch indices)` in service order
    pub shares: Vec<(usize, Vec<usize>)>,
    /// Sibling that received the last event of the batch
    pub last_served: usize,
}

/// Split a batch of `batch` events over the active members of a group
///
/// `active[i]` tells whether sibling `i` (registration order) may receive
/// events; `was_last` is the sibling that received the final event of the
/// previous batch. Service starts at the first active sibling after it and
/// wraps around. Each active sibling gets `batch / S` events and the first
/// `batch % S` in service order one more; events are dealt out interleaved.
pub fn round_robin(batch: usize, active: &[bool], was_last: Option<usize>) -> Option<RoundRobinPlan> {
    let members: Vec<usize> = (0..active.len()).filter(|&i| active[i]).collect();
    let s = members.len();
    if s == 0 || batch == 0 {
        return None;
    }

    let start = was_last
        .and_then(|last| members.iter().position(|&i| i > last))
        .unwrap_or(0);

    let per = batch / s;
    let extra = batch % s;
    let shares: Vec<(usize, Vec<usize>)> = (0..s)
        .map(|k| {
            let sibling = members[(start + k) % s];
            let count = per + usize::from(k < extra);
            (sibling, (0..count).map(|j| k + j * s).collect::<Vec<usize>>())
        })
        .filter(|(_, indices)| !indices.is_empty())
        .collect();

    let last_k = if extra > 0 { extra - 1 } else { s - 1 };
    Some(RoundRobinPlan {
        shares,
        last_served: members[(start + last_k) % s],
    })
}

/// Allocate `batch` events over siblings with input depths `depths`
///
/// The shallowest siblings are raised to the next-higher depth repeatedly;
/// whatever cannot raise a whole level is split evenly, the first
/// `remainder` siblings by ascending depth (ties in registration order)
/// getting one extra. Returns the count for each sibling in input order.
pub fn equal_cue(batch: usize, depths: &[usize]) -> Vec<usize> {
    let s = depths.len();
    let mut alloc = vec![0; s];
    if s == 0 {
        return alloc;
    }

    let mut order: Vec<usize> = (0..s).collect();
    order.sort_by_key(|&i| depths[i]);

    let mut remaining = batch;
    let mut level = depths[order[0]];
    while remaining > 0 {
        let same = order
            .iter()
            .take_while(|&&i| depths[i] + alloc[i] == level)
            .count();

        let step = if same < s {
            depths[order[same]] - level
        } else {
            0
        };

        if same == s || remaining < step * same {
            let per = remaining / same;
            let extra = remaining % same;
            for (k, &i) in order[..same].iter().enumerate() {
                alloc[i] += per + usize::from(k < extra);
            }
            break;
        }

        for &i in &order[..same] {
            alloc[i] += step;
        }
        remaining -= step * same;
        level += step;
    }

    alloc
}
