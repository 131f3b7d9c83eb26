//! Scheduling scenarios
//!
//! A–E exercise one property each; `StressTest` floods random overlapping
//! cown sets.

use crate::framework::{TestScenario, ValidationResult};
use anyhow::{ensure, Result};
use cown_runtime::{when, when2, when_all, Cown, Scheduler};
use rand::seq::SliceRandom;
use rand::Rng;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use tracing::debug;

/// Take the payload back after quiescence
fn unwrap_payload<T: Send + 'static>(cown: Cown<T>) -> Result<T> {
    match cown.try_unwrap() {
        Ok(value) => Ok(value),
        Err(cown) => anyhow::bail!(
            "{} still has {} references after quiescence",
            cown.id(),
            cown.ref_count()
        ),
    }
}

/// A: one behavior writes one cown
pub struct SingleCownWrite;

impl TestScenario for SingleCownWrite {
    fn name(&self) -> &str {
        "a_single_cown_write"
    }

    fn description(&self) -> &str {
        "Behavior on {x} sets x from 0 to 1"
    }

    fn execute(&self, scheduler: &Scheduler) -> Result<Vec<ValidationResult>> {
        let x = Cown::new(scheduler, 0u32);
        when(&x, |mut x| *x = 1)?;
        scheduler.run()?;

        Ok(vec![ValidationResult::expect_eq("x", unwrap_payload(x)?, 1)])
    }
}

/// B: a pair behavior competes with single-cown traffic
pub struct PairWithTraffic {
    pub singles: u32,
}

impl Default for PairWithTraffic {
    fn default() -> Self {
        Self { singles: 100 }
    }
}

impl TestScenario for PairWithTraffic {
    fn name(&self) -> &str {
        "b_pair_with_traffic"
    }

    fn description(&self) -> &str {
        "Behavior on {x, y} plus concurrent single-cown behaviors on {x}"
    }

    fn execute(&self, scheduler: &Scheduler) -> Result<Vec<ValidationResult>> {
        let x = Cown::new(scheduler, 0u32);
        let y = Cown::new(scheduler, 0u32);

        thread::scope(|s| -> Result<()> {
            let pair = s.spawn(|| {
                when2(&x, &y, |mut x, mut y| {
                    *x += 1;
                    *y += 1;
                })
            });
            let singles = s.spawn(|| -> cown_runtime::Result<()> {
                for _ in 0..self.singles {
                    when(&x, |mut x| *x += 1)?;
                }
                Ok(())
            });
            join_submitter(pair)?;
            join_submitter(singles)?;
            Ok(())
        })?;

        scheduler.run()?;

        Ok(vec![
            ValidationResult::expect_eq("x", unwrap_payload(x)?, self.singles + 1),
            ValidationResult::expect_eq("y", unwrap_payload(y)?, 1),
        ])
    }
}

/// C: opposite request orders from two threads
pub struct ReverseOrder {
    pub rounds: u64,
}

impl Default for ReverseOrder {
    fn default() -> Self {
        Self { rounds: 1000 }
    }
}

impl TestScenario for ReverseOrder {
    fn name(&self) -> &str {
        "c_reverse_order"
    }

    fn description(&self) -> &str {
        "{a, b} and {b, a} submitted concurrently never deadlock"
    }

    fn execute(&self, scheduler: &Scheduler) -> Result<Vec<ValidationResult>> {
        // The shared counter is a + b.
        let a = Cown::new(scheduler, 0u64);
        let b = Cown::new(scheduler, 0u64);
        let start = Barrier::new(2);
        let rounds = self.rounds;

        thread::scope(|s| -> Result<()> {
            let forward = s.spawn(|| -> cown_runtime::Result<()> {
                start.wait();
                for _ in 0..rounds {
                    when2(&a, &b, |mut a, b| {
                        let total = *a + *b + 1;
                        *a = total - *b;
                    })?;
                }
                Ok(())
            });
            let reverse = s.spawn(|| -> cown_runtime::Result<()> {
                start.wait();
                for _ in 0..rounds {
                    when2(&b, &a, |mut b, a| {
                        let total = *a + *b + 1;
                        *b = total - *a;
                    })?;
                }
                Ok(())
            });
            join_submitter(forward)?;
            join_submitter(reverse)?;
            Ok(())
        })?;

        scheduler.run()?;

        let total = unwrap_payload(a)? + unwrap_payload(b)?;
        Ok(vec![ValidationResult::expect_eq("a + b", total, 2 * rounds)])
    }
}

/// D: destructor runs synchronously on the final drop
pub struct DestructorOnDrop;

impl TestScenario for DestructorOnDrop {
    fn name(&self) -> &str {
        "d_destructor_on_drop"
    }

    fn description(&self) -> &str {
        "Dropping the only handle with no pending work runs the destructor"
    }

    fn execute(&self, scheduler: &Scheduler) -> Result<Vec<ValidationResult>> {
        let flag = Arc::new(AtomicBool::new(false));
        let recorder = flag.clone();
        let cown = Cown::with_destructor(scheduler, [0u8; 64], move |_| {
            recorder.store(true, Ordering::SeqCst);
        });

        drop(cown);
        let ran = flag.load(Ordering::SeqCst);
        scheduler.run()?;

        Ok(vec![ValidationResult::check(
            "destructor",
            ran,
            if ran { "ran before drop returned" } else { "did not run" },
        )])
    }
}

/// E: a leaked handle is reported after quiescence
pub struct LeakedHandle;

impl TestScenario for LeakedHandle {
    fn name(&self) -> &str {
        "e_leaked_handle"
    }

    fn description(&self) -> &str {
        "Leak detection flags a cown whose handle is never dropped"
    }

    fn execute(&self, scheduler: &Scheduler) -> Result<Vec<ValidationResult>> {
        scheduler.set_leak_detection(true);
        let leaked = Cown::new(scheduler, String::from("leaked"));
        when(&leaked, |s| debug!(len = s.len(), "Touching leaked cown"))?;
        scheduler.run()?;

        let detected = scheduler.has_leaked();
        drop(leaked);

        Ok(vec![ValidationResult::check(
            "has_leaked",
            detected,
            format!("has_leaked() = {}", detected),
        )])
    }
}

/// Random overlapping request sets across many cowns
pub struct StressTest {
    pub cowns: usize,
    pub behaviors: usize,
    pub max_width: usize,
}

impl Default for StressTest {
    fn default() -> Self {
        Self {
            cowns: 64,
            behaviors: 20_000,
            max_width: 4,
        }
    }
}

impl TestScenario for StressTest {
    fn name(&self) -> &str {
        "stress"
    }

    fn description(&self) -> &str {
        "Random overlapping cown sets; every behavior runs exactly once"
    }

    fn execute(&self, scheduler: &Scheduler) -> Result<Vec<ValidationResult>> {
        ensure!(self.cowns > 0, "stress needs at least one cown");
        let width = self.max_width.clamp(1, self.cowns);

        let cowns: Vec<_> = (0..self.cowns).map(|_| Cown::new(scheduler, 0u64)).collect();
        let indices: Vec<usize> = (0..self.cowns).collect();
        let mut expected = vec![0u64; self.cowns];
        let mut rng = rand::thread_rng();

        for _ in 0..self.behaviors {
            let n = rng.gen_range(1..=width);
            let picked: Vec<usize> = indices.choose_multiple(&mut rng, n).copied().collect();
            for &i in &picked {
                expected[i] += 1;
            }
            let set: Vec<_> = picked.iter().map(|&i| cowns[i].clone()).collect();
            when_all(&set, |mut held| {
                for c in held.iter_mut() {
                    **c += 1;
                }
            })?;
        }

        scheduler.run()?;

        let mut mismatches = 0;
        for (cown, expected) in cowns.into_iter().zip(expected) {
            if unwrap_payload(cown)? != expected {
                mismatches += 1;
            }
        }

        Ok(vec![
            ValidationResult::expect_eq("mismatched cowns", mismatches, 0),
            ValidationResult::expect_eq("outstanding", scheduler.outstanding(), 0),
        ])
    }
}

fn join_submitter(
    handle: thread::ScopedJoinHandle<'_, cown_runtime::Result<()>>,
) -> Result<()> {
    match handle.join() {
        Ok(result) => Ok(result?),
        Err(_) => anyhow::bail!("submitter thread panicked"),
    }
}

/// Scenarios A through E in order
pub fn all_scenarios() -> Vec<Box<dyn TestScenario>> {
    vec![
        Box::new(SingleCownWrite),
        Box::new(PairWithTraffic::default()),
        Box::new(ReverseOrder::default()),
        Box::new(DestructorOnDrop),
        Box::new(LeakedHandle),
    ]
}
