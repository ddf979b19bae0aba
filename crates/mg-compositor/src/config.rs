//! Scheduler-local configuration (§6.3): the core-facing knobs an external
//! CLI driver would set, exposed as typed option structs rather than parsed
//! here (argument parsing is an external collaborator's job). Shaped after
//! `myq2-server::sv_main::ServerTiming`/`DEFAULT_SV_FPS`: a `Default` impl
//! carrying the documented default, plus a constructor for the non-default
//! case.

use crate::direct_send::DEFAULT_MAX_IMAGE_SPLIT;
use crate::radix_k::DEFAULT_TARGET_K;

/// Options for [`crate::direct_send::compose_capped`].
#[derive(Clone, Copy, Debug)]
pub struct DirectSendConfig {
    /// `--max-image-split`: caps `|R|`, the number of pieces an image is
    /// split into, bounding per-round network fan-out.
    pub max_image_split: usize,
}

impl Default for DirectSendConfig {
    fn default() -> Self {
        DirectSendConfig { max_image_split: DEFAULT_MAX_IMAGE_SPLIT }
    }
}

/// Options for [`crate::radix_k::compose_with_target_k`] and
/// [`crate::radix_k::generate_k`].
#[derive(Clone, Debug)]
pub struct RadixKConfig {
    /// `--k`: an explicit factor sequence, validated to multiply to `N`.
    /// `None` means "derive one from `target_k`" (§4.6).
    pub k: Option<Vec<usize>>,
    /// `--target-k`: the factor size [`crate::radix_k::generate_k`] prefers
    /// when `k` is not given.
    pub target_k: usize,
}

impl Default for RadixKConfig {
    fn default() -> Self {
        RadixKConfig { k: None, target_k: DEFAULT_TARGET_K }
    }
}

impl RadixKConfig {
    /// Resolves this config against a participant count, validating an
    /// explicit `k` or generating one from `target_k` (§4.6, §7
    /// `GroupConstraintViolated`).
    pub fn resolve(&self, num_proc: usize) -> Result<Vec<usize>, crate::error::CompositeError> {
        match &self.k {
            Some(factors) => {
                let product: usize = factors.iter().product();
                if product != num_proc {
                    return Err(crate::error::CompositeError::GroupConstraintViolated {
                        detail: "radix-k: supplied factors do not multiply to the participant count",
                    });
                }
                Ok(factors.clone())
            }
            None => Ok(crate::radix_k::generate_k(self.target_k, num_proc)),
        }
    }
}
