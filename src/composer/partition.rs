use smallvec::SmallVec;

use crate::foundation::geometry::IRect;
use crate::layer::stack::LayerStack;

/// Disjoint rectangle of a target with the layers visible in it.
///
/// `layers` holds stack indices in ascending order, so the topmost contributor comes first;
/// renderers draw the list back to front.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize)]
pub struct Partition {
    /// Region in target coordinates.
    pub region: IRect,
    /// Contributing stack indices, topmost first.
    pub layers: SmallVec<[usize; 8]>,
}

/// Split `target` into disjoint rectangles, each tagged with the layers visible in it.
///
/// Layers are visited top to bottom. A layer splits every partition it partially overlaps
/// into the overlapping part and up to four outside parts; the outside parts are processed
/// independently with the layers below. Within a partition, the walk stops after the first
/// opaque layer. The result depends only on the stack geometry and `target`.
pub fn partition(stack: &LayerStack, target: IRect) -> Vec<Partition> {
    let mut parts = vec![Partition {
        region: target,
        layers: SmallVec::new(),
    }];
    if target.is_empty() {
        return parts;
    }

    // (partition index, next layer to intersect)
    let mut work: Vec<(usize, usize)> = vec![(0, 0)];
    while let Some((pi, first)) = work.pop() {
        let mut ly = first;
        while ly < stack.len() {
            let layer = stack.layer(ly);
            if !layer.is_enabled() {
                ly += 1;
                continue;
            }
            let region = parts[pi].region;
            let Some(inside) = region.intersect(layer.dst) else {
                ly += 1;
                continue;
            };

            for outside in region.subtract(layer.dst) {
                let layers = parts[pi].layers.clone();
                parts.push(Partition {
                    region: outside,
                    layers,
                });
                work.push((parts.len() - 1, ly + 1));
            }
            parts[pi].region = inside;
            parts[pi].layers.push(ly);

            if layer.is_opaque() {
                break;
            }
            ly += 1;
        }
    }

    tracing::trace!(
        target_rect = ?target,
        layers = stack.len(),
        partitions = parts.len(),
        "partitioned layer stack"
    );
    parts
}

#[cfg(test)]
#[path = "../../tests/unit/composer/partition.rs"]
mod tests;
