// VANALLIN BATCH COMPILER
// RECIPE x CPU SET -> FLAT PER-SLOT BATCHES, POLL KIND -> ONE SINGLE-OP BATCH PER SAMPLE
//
// LAYOUT IS OPERATION-MAJOR, CPU-MINOR: ops[o * ncpu + c]. SAME-OP READS FROM
// DIFFERENT CPUS SIT NEXT TO EACH OTHER.

use std::time::Duration;

use anyhow::{bail, Result};

use crate::job::{Job, LongitudinalTask, PollTask};
use crate::msr::{self, RegisterOp};
use crate::recipe::{RecipeTable, Slot};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Batch {
    pub ops: Vec<RegisterOp>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn all_executed(&self) -> bool {
        self.ops.iter().all(|op| op.executed())
    }
}

pub struct BatchCompiler {
    recipes: RecipeTable,
}

impl Default for BatchCompiler {
    fn default() -> Self {
        Self::new(RecipeTable::standard())
    }
}

impl BatchCompiler {
    pub fn new(recipes: RecipeTable) -> Self {
        Self { recipes }
    }

    // NONE WHEN THE RECIPE SLOT HAS NO OPERATIONS. NEVER SUBMITTED.
    pub fn compile_slot(&self, task: &LongitudinalTask, slot: Slot) -> Result<Option<Batch>> {
        let ops_per_cpu = self.recipes.ops_per_cpu(task.kind, slot);
        if ops_per_cpu == 0 {
            return Ok(None);
        }
        let ncpu = task.sample_cpus.count();
        if ncpu == 0 {
            bail!("{} TASK HAS NO SAMPLE CPUS", task.kind);
        }
        let templates = self.recipes.ops(task.kind, slot);

        let mut ops = vec![RegisterOp::default(); ops_per_cpu * ncpu];
        for (o, template) in templates.iter().enumerate() {
            // CURSOR RESTARTS AT THE LOWEST MEMBER FOR EVERY OPERATION ROW
            let mut cursor = task.sample_cpus.first();
            for c in 0..ncpu {
                let cpu = match cursor {
                    Some(cpu) => cpu,
                    None => bail!("CPU SET EXHAUSTED AT POSITION {} OF {}", c, ncpu),
                };
                ops[o * ncpu + c] = template.instantiate(msr_cpu(cpu)?);
                cursor = task.sample_cpus.next_member(cpu + 1);
            }
        }
        Ok(Some(Batch { ops }))
    }

    pub fn compile_longitudinal(&self, task: &mut LongitudinalTask) -> Result<()> {
        for slot in Slot::ALL {
            task.batches[slot.index()] = self.compile_slot(task, slot)?;
        }
        Ok(())
    }

    // EACH SAMPLE IS SUBMITTED AND TIMESTAMPED ON ITS OWN
    pub fn compile_poll(&self, task: &mut PollTask, duration: Duration) -> Result<()> {
        let template = task.kind.template();
        let cpu = msr_cpu(task.sampled_cpu)?;
        let total = task.total_samples(duration);
        task.samples = vec![template.instantiate(cpu); total];
        Ok(())
    }

    pub fn compile_job(&self, job: &mut Job) -> Result<()> {
        let duration = job.duration;
        for poll in job.polls.iter_mut() {
            self.compile_poll(poll, duration)?;
        }
        for task in job.longitudinals.iter_mut() {
            self.compile_longitudinal(task)?;
        }
        Ok(())
    }
}

fn msr_cpu(cpu: usize) -> Result<u16> {
    if cpu > msr::MAX_MSR_SAFE_CPU {
        bail!("CPU {} IS BEYOND WHAT msr-safe CAN ADDRESS", cpu);
    }
    Ok(cpu as u16)
}
