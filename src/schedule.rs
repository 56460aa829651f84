//! Prudent prefetching: given the order in which a consumer will ask for
//! blocks and a concurrency bound, compute the order in which reads
//! should be issued so the consumer stalls as little as possible.

/// Compute a read order for disk-assignment sequence `disks` (the order
/// the consumer will *consume* blocks), given a concurrency bound `m`
/// (the prefetch pool size).
///
/// Reads are reordered within sliding, non-overlapping windows of `m`
/// consecutive deadlines: inside each window, reads are grouped by disk
/// (a stable sort), so that a window's reads for one disk are issued
/// back to back instead of interleaved with another disk's, letting the
/// other disks' reads for that window proceed without waiting behind
/// them. No read ever moves more than `m` slots from its own deadline,
/// since reordering never crosses a window boundary; subject to that
/// bound, same-disk reads end up consumption-ordered within the window.
pub fn schedule(disks: &[usize], m: usize) -> Vec<usize> {
    let l = disks.len();
    let m = m.max(1);
    if l <= m {
        return (0..l).collect();
    }

    let mut order = Vec::with_capacity(l);
    for window_start in (0..l).step_by(m) {
        let window_end = (window_start + m).min(l);
        let mut window: Vec<usize> = (window_start..window_end).collect();
        window.sort_by_key(|&i| disks[i]);
        order.extend(window);
    }
    order
}

/// Post-hoc sanity check of a computed schedule: for each disk, the
/// largest distance between a read's issue position in `order` and its
/// own consumption deadline (its index in the original `disks`
/// sequence), and whether every read stayed within the bound `m`.
#[derive(Debug, Clone)]
pub struct ScheduleStats {
    pub per_disk_max_displacement: Vec<usize>,
    pub bound_respected: bool,
}

impl ScheduleStats {
    pub fn evaluate(disks: &[usize], order: &[usize], m: usize) -> Self {
        let disk_count = disks.iter().copied().max().map(|d| d + 1).unwrap_or(0);
        let mut issue_position = vec![0usize; disks.len()];
        for (pos, &deadline) in order.iter().enumerate() {
            issue_position[deadline] = pos;
        }

        let mut per_disk_max = vec![0usize; disk_count];
        for (deadline, &disk) in disks.iter().enumerate() {
            let displacement = issue_position[deadline].abs_diff(deadline);
            per_disk_max[disk] = per_disk_max[disk].max(displacement);
        }

        let bound = m.max(1);
        let bound_respected = per_disk_max.iter().all(|&v| v < bound);
        ScheduleStats {
            per_disk_max_displacement: per_disk_max,
            bound_respected,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_sequence_returns_identity() {
        let disks = vec![0, 1, 2];
        assert_eq!(schedule(&disks, 4), vec![0, 1, 2]);
    }

    #[test]
    fn single_disk_degenerates_to_consumption_order() {
        let disks = vec![0; 10];
        let order = schedule(&disks, 2);
        assert_eq!(order, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn schedule_is_a_permutation() {
        let disks = vec![0, 1, 0, 1, 2, 0, 1, 2, 0, 1, 2, 3];
        let order = schedule(&disks, 3);
        let mut sorted = order.clone();
        sorted.sort();
        assert_eq!(sorted, (0..disks.len()).collect::<Vec<_>>());
    }

    #[test]
    fn respects_concurrency_bound_on_a_striped_sequence() {
        let disks: Vec<usize> = (0..40).map(|i| i % 4).collect();
        let m = 4;
        let order = schedule(&disks, m);
        let stats = ScheduleStats::evaluate(&disks, &order, m);
        assert!(stats.bound_respected, "stats: {stats:?}");
    }

    #[test]
    fn no_read_moves_further_than_the_window_size() {
        let disks = vec![1, 0, 2, 0, 1, 2, 0, 0, 1, 2];
        let m = 3;
        let order = schedule(&disks, m);
        let stats = ScheduleStats::evaluate(&disks, &order, m);
        assert!(stats.bound_respected, "stats: {stats:?}");
        assert!(stats.per_disk_max_displacement.iter().all(|&d| d < m));
    }

    #[test]
    fn all_same_disk_schedule_bound_is_trivially_respected() {
        let disks = vec![2; 20];
        let m = 3;
        let order = schedule(&disks, m);
        let stats = ScheduleStats::evaluate(&disks, &order, m);
        assert!(stats.bound_respected);
    }
}
