use std::collections::HashSet;
use sysinfo::{Pid, ProcessRefreshKind, System};

/// Peak and average resource usage over a run
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct UsageSummary {
    pub peak_memory_bytes: u64,
    pub average_memory_bytes: u64,
    pub peak_cpu_percent: f32,
    pub average_cpu_percent: f32,
    pub samples: u64,
}

/// Periodic memory/CPU sampler for a run's process tree. Every descendant
/// of the root process counts towards the totals. A failed sample is
/// skipped, never fatal.
pub struct UsageSampler {
    system: System,
    tree: HashSet<Pid>,
    samples: u64,
    memory_total: u128,
    peak_memory: u64,
    cpu_total: f64,
    peak_cpu: f32,
}

impl UsageSampler {
    pub fn new(pid: u32) -> Self {
        let root = Pid::from_u32(pid);
        Self {
            system: System::new(),
            tree: HashSet::from([root]),
            samples: 0,
            memory_total: 0,
            peak_memory: 0,
            cpu_total: 0.0,
            peak_cpu: 0.0,
        }
    }

    /// Take one sample and return the resident memory of the whole tree in
    /// bytes, or `None` when no process of the tree could be observed.
    pub fn sample(&mut self) -> Option<u64> {
        self.system
            .refresh_processes_specifics(ProcessRefreshKind::new().with_memory().with_cpu());
        self.discover_descendants();

        let processes = self.system.processes();
        // Forget exited processes so a recycled pid is not charged to this run
        self.tree.retain(|pid| processes.contains_key(pid));
        if self.tree.is_empty() {
            return None;
        }

        let (memory, cpu) = self
            .tree
            .iter()
            .filter_map(|pid| processes.get(pid))
            .fold((0u64, 0f32), |(memory, cpu), process| {
                (memory + process.memory(), cpu + process.cpu_usage())
            });
        self.record(memory, cpu);
        Some(memory)
    }

    /// Processes currently attributed to the run
    pub fn tree_size(&self) -> usize {
        self.tree.len()
    }

    /// Grow the tree until no running process has a parent inside it.
    /// Descendants seen once stay attributed even after being reparented.
    fn discover_descendants(&mut self) {
        let processes = self.system.processes();
        loop {
            let found: Vec<Pid> = processes
                .iter()
                .filter(|(pid, process)| {
                    // Threads share their process's memory and are listed under it
                    process.thread_kind().is_none()
                        && !self.tree.contains(pid)
                        && process.parent().is_some_and(|parent| self.tree.contains(&parent))
                })
                .map(|(pid, _)| *pid)
                .collect();
            if found.is_empty() {
                break;
            }
            self.tree.extend(found);
        }
    }

    fn record(&mut self, memory: u64, cpu: f32) {
        self.samples += 1;
        self.memory_total += u128::from(memory);
        self.peak_memory = self.peak_memory.max(memory);
        self.cpu_total += f64::from(cpu);
        self.peak_cpu = self.peak_cpu.max(cpu);
    }

    pub fn summary(&self) -> UsageSummary {
        if self.samples == 0 {
            return UsageSummary::default();
        }
        UsageSummary {
            peak_memory_bytes: self.peak_memory,
            average_memory_bytes: (self.memory_total / u128::from(self.samples)) as u64,
            peak_cpu_percent: self.peak_cpu,
            average_cpu_percent: (self.cpu_total / self.samples as f64) as f32,
            samples: self.samples,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command;

    #[test]
    fn summary_without_samples_is_zeroed() {
        let sampler = UsageSampler::new(u32::MAX - 1);
        assert_eq!(sampler.summary(), UsageSummary::default());
    }

    #[test]
    fn missing_process_yields_no_sample() {
        let mut sampler = UsageSampler::new(u32::MAX - 1);
        assert_eq!(sampler.sample(), None);
        assert_eq!(sampler.summary().samples, 0);
        assert_eq!(sampler.tree_size(), 0);
    }

    #[test]
    fn aggregates_peak_and_average() {
        let mut sampler = UsageSampler::new(1);
        sampler.record(100, 10.0);
        sampler.record(300, 30.0);
        let summary = sampler.summary();
        assert_eq!(summary.peak_memory_bytes, 300);
        assert_eq!(summary.average_memory_bytes, 200);
        assert_eq!(summary.peak_cpu_percent, 30.0);
        assert_eq!(summary.average_cpu_percent, 20.0);
        assert_eq!(summary.samples, 2);
    }

    #[test]
    fn samples_own_process() {
        let mut sampler = UsageSampler::new(std::process::id());
        assert!(sampler.sample().is_some_and(|rss| rss > 0));
    }

    #[test]
    fn children_are_part_of_the_tree() {
        let Ok(mut child) = Command::new("sleep").arg("2").spawn() else {
            eprintln!("Skipping test: sleep not available");
            return;
        };
        let child_pid = Pid::from_u32(child.id());

        let mut sampler = UsageSampler::new(std::process::id());
        let sampled = sampler.sample();
        let tracked = sampler.tree.contains(&child_pid);
        let _ = child.kill();
        let _ = child.wait();

        assert!(sampled.is_some());
        assert!(tracked);
        assert!(sampler.tree_size() >= 2);
    }
}
