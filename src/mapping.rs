//! Transport of accepted isodose bands into the recipient frame.

use anyhow::Result;

use crate::isodose::AcceptedBand;
use crate::kernel::{Frame, Kernel};
use crate::transform;

/// Maps the accepted bands that still have contours into the recipient
/// frame, returning the names instantiated there. A band with no contours is
/// never mapped; transporting degenerate geometry would only pollute the
/// target frame.
pub fn map_nonempty<K: Kernel>(
    kernel: &mut K,
    bands: &[AcceptedBand],
    from: &Frame,
    to: &Frame,
) -> Result<Vec<String>> {
    let names: Vec<String> = bands
        .iter()
        .filter(|band| {
            let keep = kernel.has_contours(&from.id, &band.name);
            if !keep {
                log::warn!(
                    "band '{}' has no contours in frame '{}'; not mapped",
                    band.name,
                    from.id
                );
            }
            keep
        })
        .map(|band| band.name.clone())
        .collect();

    transform::map_regions(kernel, &names, from, to)
}
