// XRSTOR: ZERO YMM0-15, THEN RESTORE THEM FROM A PREFILLED XSAVE AREA, UNTIL HALT
//
// XSAVE AREA LAYOUT (STANDARD FORM, x87 | SSE | AVX):
//   000-031  LEGACY x87/SSE HEADER
//   160-415  XMM0-15 / LOW 128 BITS OF YMM0-15   <- p1
//   512-519  XSTATE_BV (FORCED TO 0x7)
//   520-527  XCOMP_BV  (ZERO: NO COMPACTION)
//   576-831  HIGH 128 BITS OF YMM0-15            <- p2

use anyhow::{bail, Result};

use crate::job::BenchmarkTask;
use crate::signals::Signals;

use super::Workload;

pub const XSAVE_MASK: u64 = 0x7;
pub const REGION_SIZE: usize = 848;
pub const YMM_LO_OFFSET: usize = 160;
pub const YMM_HI_OFFSET: usize = 576;
pub const YMM_HALF_BYTES: usize = 256;
pub const XSTATE_BV_OFFSET: usize = 512;

// XSAVE NEEDS 64-BYTE ALIGNMENT. PAGE-ALIGN IT.
#[repr(C, align(4096))]
pub struct XsaveArea(pub [u8; REGION_SIZE]);

impl XsaveArea {
    fn fill(&mut self, lo: u64, hi: u64) {
        for i in 0..YMM_HALF_BYTES / 8 {
            let at = YMM_LO_OFFSET + i * 8;
            self.0[at..at + 8].copy_from_slice(&lo.to_ne_bytes());
            let at = YMM_HI_OFFSET + i * 8;
            self.0[at..at + 8].copy_from_slice(&hi.to_ne_bytes());
        }
        self.0[XSTATE_BV_OFFSET] = XSAVE_MASK as u8;
    }
}

#[derive(Default)]
pub struct Xrstor;

#[cfg(target_arch = "x86_64")]
mod imp {
    use std::arch::x86_64::{_mm256_zeroall, _xrstor64, _xsave64};

    use crate::signals::Signals;

    use super::{XsaveArea, XSAVE_MASK};

    pub fn supported() -> bool {
        std::arch::is_x86_feature_detected!("xsave") && std::arch::is_x86_feature_detected!("avx")
    }

    // KNOWN-GOOD LAYOUT FROM THE LIVE REGISTER STATE
    #[target_feature(enable = "xsave")]
    pub unsafe fn save(area: &mut XsaveArea) {
        _xsave64(area.0.as_mut_ptr(), XSAVE_MASK);
    }

    #[target_feature(enable = "xsave,avx")]
    pub unsafe fn restore_until_halt(area: &XsaveArea, signals: &Signals) -> u64 {
        let mut restores: u64 = 0;
        while !signals.halted() {
            _mm256_zeroall();
            _xrstor64(area.0.as_ptr(), XSAVE_MASK);
            restores += 1;
        }
        restores
    }

    // RESTORE area INTO THE YMM FILE, THEN SAVE IT BACK OUT INTO out
    #[cfg(test)]
    #[target_feature(enable = "xsave,avx")]
    pub unsafe fn restore_then_save(area: &XsaveArea, out: &mut XsaveArea) {
        _xrstor64(area.0.as_ptr(), XSAVE_MASK);
        _xsave64(out.0.as_mut_ptr(), XSAVE_MASK);
    }
}

impl Workload for Xrstor {
    // PARAMS: p1 = FILL FOR LOW YMM HALVES, p2 = FILL FOR HIGH YMM HALVES
    #[cfg(target_arch = "x86_64")]
    fn initialize(&self, task: &mut BenchmarkTask) -> Result<()> {
        if !imp::supported() {
            bail!("XRSTOR NEEDS XSAVE AND OS-ENABLED AVX STATE ON THIS CPU");
        }
        let mut area = Box::new(XsaveArea([0; REGION_SIZE]));
        // SAFETY: FEATURES CHECKED ABOVE, AREA IS 64-BYTE ALIGNED AND REGION_SIZE LONG
        unsafe { imp::save(&mut area) };
        area.fill(task.params[0], task.params[1]);
        task.state = Some(area);
        Ok(())
    }

    #[cfg(not(target_arch = "x86_64"))]
    fn initialize(&self, _task: &mut BenchmarkTask) -> Result<()> {
        bail!("XRSTOR IS ONLY AVAILABLE ON x86_64");
    }

    fn run(&self, task: &mut BenchmarkTask, signals: &Signals) {
        let restores = match task.state.as_ref().and_then(|s| s.downcast_ref::<XsaveArea>()) {
            #[cfg(target_arch = "x86_64")]
            // SAFETY: AREA WAS BUILT BY initialize AFTER THE FEATURE CHECK
            Some(area) => unsafe { imp::restore_until_halt(area, signals) },
            _ => {
                log::error!("XRSTOR THREAD {} HAS NO XSAVE AREA", task.thread);
                0
            }
        };
        task.executed_loops[0] += restores;
        task.output = restores;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn area_is_page_aligned() {
        assert_eq!(std::mem::align_of::<XsaveArea>(), 4096);
        let area = Box::new(XsaveArea([0; REGION_SIZE]));
        assert_eq!(area.0.as_ptr() as usize % 64, 0);
    }

    #[test]
    fn fill_places_both_halves() {
        let mut area = XsaveArea([0; REGION_SIZE]);
        area.fill(0x1111_1111_1111_1111, 0x2222_2222_2222_2222);
        assert_eq!(area.0[XSTATE_BV_OFFSET], 0x7);
        assert!(area.0[YMM_LO_OFFSET..YMM_LO_OFFSET + YMM_HALF_BYTES].iter().all(|&b| b == 0x11));
        assert!(area.0[YMM_HI_OFFSET..YMM_HI_OFFSET + YMM_HALF_BYTES].iter().all(|&b| b == 0x22));
        // HEADER BYTES BETWEEN THE HALVES STAY UNTOUCHED
        assert_eq!(area.0[XSTATE_BV_OFFSET + 1], 0);
    }

    #[cfg(target_arch = "x86_64")]
    #[test]
    fn filled_area_survives_restore_and_save() {
        if !imp::supported() {
            return;
        }
        let mut area = Box::new(XsaveArea([0; REGION_SIZE]));
        // SAFETY: FEATURES CHECKED ABOVE, BOTH AREAS ARE ALIGNED AND REGION_SIZE LONG
        unsafe { imp::save(&mut area) };
        area.fill(0x0123_4567_89ab_cdef, 0xfedc_ba98_7654_3210);
        let mut back = Box::new(XsaveArea([0; REGION_SIZE]));
        unsafe { imp::restore_then_save(&area, &mut back) };

        let lo = YMM_LO_OFFSET..YMM_LO_OFFSET + YMM_HALF_BYTES;
        let hi = YMM_HI_OFFSET..YMM_HI_OFFSET + YMM_HALF_BYTES;
        assert_eq!(back.0[lo.clone()], area.0[lo]);
        assert_eq!(back.0[hi.clone()], area.0[hi]);
        assert_eq!(back.0[XSTATE_BV_OFFSET] & 0x6, 0x6);
    }

    #[cfg(target_arch = "x86_64")]
    #[test]
    fn restores_until_halt() {
        use crate::job::BenchmarkKind;
        if !imp::supported() {
            return;
        }
        let signals = Signals::new();
        let mut task = BenchmarkTask::new(BenchmarkKind::Xrstor, 0, 0, 0, [1, 2, 0]);
        Xrstor.initialize(&mut task).unwrap();
        std::thread::scope(|s| {
            s.spawn(|| Xrstor.run(&mut task, &signals));
            std::thread::sleep(std::time::Duration::from_millis(20));
            signals.raise_halt();
        });
        assert!(task.executed_loops[0] > 0);
    }
}
