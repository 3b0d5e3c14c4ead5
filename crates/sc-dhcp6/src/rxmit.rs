//! Retransmission backoff per RFC 3315 §14.

use rand::Rng;

use crate::message::RxmitParams;

/// Backoff bookkeeping for one message exchange.
#[derive(Debug, Clone, Default)]
pub struct Rxmit {
    /// Next transmission deadline; 0 = not yet armed.
    pub deadline_ms: u64,
    /// Previously computed RT; 0 = none yet.
    pub rt_prev_ms: u64,
    /// Per-exchange MRD override. RENEW/REBIND bound their duration by the
    /// time remaining until T2 / lease expiry rather than a fixed constant.
    pub mrd_override_ms: u64,
}

impl Rxmit {
    pub fn reset(&mut self) {
        self.deadline_ms = 0;
        self.rt_prev_ms = 0;
        self.mrd_override_ms = 0;
    }

    fn mrd_ms(&self, params: &RxmitParams) -> u64 {
        if self.mrd_override_ms > 0 {
            self.mrd_override_ms
        } else {
            params.mrd_ms
        }
    }

    /// Arm the deadline for the first transmission of an exchange: a random
    /// delay up to the message's max-delay constant (RFC 3315 §17.1.2).
    pub fn arm_initial<R: Rng>(&mut self, params: &RxmitParams, now_ms: u64, rng: &mut R) {
        let delay = if params.max_delay_ms > 0 {
            rng.random_range(0..=params.max_delay_ms)
        } else {
            0
        };
        self.deadline_ms = now_ms + delay;
    }

    /// True once the exchange has hit its termination condition: MRC
    /// transmissions sent, or MRD elapsed since the first transmission.
    /// With MRC and MRD both zero the exchange retries indefinitely.
    pub fn exhausted(
        &self,
        params: &RxmitParams,
        xmt_cntr: u32,
        first_xmt_ms: u64,
        now_ms: u64,
    ) -> bool {
        let mrd = self.mrd_ms(params);
        if params.mrc == 0 && mrd == 0 {
            return false;
        }
        if params.mrc != 0 && xmt_cntr >= params.mrc {
            return true;
        }
        mrd != 0 && first_xmt_ms != 0 && now_ms >= first_xmt_ms + mrd
    }

    /// Compute the deadline for the retransmission following a send at
    /// `now_ms`, and roll RTprev forward.
    ///
    /// First computation of an exchange (no RTprev, or fewer than two
    /// transmissions so far): RT = IRT + jitter(IRT). Afterwards:
    /// RT = 2·RTprev + jitter(RTprev), capped at MRT + jitter(MRT) when MRT
    /// is nonzero. jitter(x) is uniform in [-0.1x, +0.1x].
    pub fn compute_next<R: Rng>(
        &mut self,
        params: &RxmitParams,
        xmt_cntr: u32,
        now_ms: u64,
        rng: &mut R,
    ) -> u64 {
        let mut rt = if self.rt_prev_ms == 0 || xmt_cntr < 2 {
            params.irt_ms.saturating_add_signed(jitter(params.irt_ms, rng))
        } else {
            (2 * self.rt_prev_ms).saturating_add_signed(jitter(self.rt_prev_ms, rng))
        };
        if params.mrt_ms > 0 && rt > params.mrt_ms {
            rt = params.mrt_ms.saturating_add_signed(jitter(params.mrt_ms, rng));
        }
        self.rt_prev_ms = rt;
        self.deadline_ms = now_ms + rt;
        self.deadline_ms
    }
}

fn jitter<R: Rng>(base_ms: u64, rng: &mut R) -> i64 {
    let range = (base_ms / 10) as i64;
    if range == 0 {
        return 0;
    }
    rng.random_range(-range..=range)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{rxmit_params, MessageType};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_deadlines_increase_until_cap() {
        let mut rng = StdRng::seed_from_u64(7);
        let params = rxmit_params(MessageType::Solicit);
        let mut rxmit = Rxmit::default();

        let mut now = 0u64;
        let mut prev_rt = 0u64;
        let mut capped = false;
        for cntr in 1..=12u32 {
            let deadline = rxmit.compute_next(&params, cntr, now, &mut rng);
            let rt = deadline - now;
            if capped {
                // Clustered around MRT within the 10% jitter band.
                assert!(rt >= params.mrt_ms * 9 / 10);
                assert!(rt <= params.mrt_ms * 11 / 10);
            } else if prev_rt > 0 && rt >= params.mrt_ms * 9 / 10 {
                capped = true;
            } else if prev_rt > 0 {
                assert!(rt > prev_rt, "RT {} not above previous {}", rt, prev_rt);
            }
            prev_rt = rt;
            now = deadline;
        }
        assert!(capped, "SOLICIT backoff never reached the MRT cap");
    }

    #[test]
    fn test_first_rt_near_irt() {
        let mut rng = StdRng::seed_from_u64(1);
        let params = rxmit_params(MessageType::Request);
        let mut rxmit = Rxmit::default();
        let deadline = rxmit.compute_next(&params, 1, 5000, &mut rng);
        let rt = deadline - 5000;
        assert!(rt >= params.irt_ms * 9 / 10);
        assert!(rt <= params.irt_ms * 11 / 10);
    }

    #[test]
    fn test_mrc_exhaustion() {
        let params = rxmit_params(MessageType::Release);
        let rxmit = Rxmit::default();
        assert!(!rxmit.exhausted(&params, 4, 1000, 60_000));
        assert!(rxmit.exhausted(&params, 5, 1000, 60_000));
    }

    #[test]
    fn test_mrd_exhaustion() {
        let params = rxmit_params(MessageType::Confirm);
        let rxmit = Rxmit::default();
        // MRD 10s from the first transmission
        assert!(!rxmit.exhausted(&params, 3, 1000, 10_000));
        assert!(rxmit.exhausted(&params, 3, 1000, 11_000));
        // Never before the first transmission
        assert!(!rxmit.exhausted(&params, 0, 0, 1_000_000));
    }

    #[test]
    fn test_indefinite_when_unbounded() {
        let params = rxmit_params(MessageType::Solicit);
        let rxmit = Rxmit::default();
        assert!(!rxmit.exhausted(&params, 10_000, 1, u64::MAX / 2));
    }

    #[test]
    fn test_mrd_override() {
        let params = rxmit_params(MessageType::Renew);
        let mut rxmit = Rxmit::default();
        rxmit.mrd_override_ms = 30_000;
        assert!(!rxmit.exhausted(&params, 2, 1000, 30_000));
        assert!(rxmit.exhausted(&params, 2, 1000, 31_000));
    }

    #[test]
    fn test_initial_delay_within_bound() {
        let mut rng = StdRng::seed_from_u64(3);
        let params = rxmit_params(MessageType::Solicit);
        for _ in 0..32 {
            let mut rxmit = Rxmit::default();
            rxmit.arm_initial(&params, 1000, &mut rng);
            assert!(rxmit.deadline_ms >= 1000);
            assert!(rxmit.deadline_ms <= 1000 + params.max_delay_ms);
        }

        let req = rxmit_params(MessageType::Request);
        let mut rxmit = Rxmit::default();
        rxmit.arm_initial(&req, 1000, &mut rng);
        assert_eq!(rxmit.deadline_ms, 1000);
    }
}
