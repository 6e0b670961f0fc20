//! Turns the depth trimap into per-object seed regions.
//!
//! Every sufficiently large foreground component becomes a seed: the
//! component itself is certain foreground, a dilated band around it is the
//! region the color stage has to decide, and a second ring beyond that band
//! is certain background. Everything else is excluded.

use image::Luma;
use imageproc::morphology::Mask as StructuringElement;
use imageproc::region_labelling::{connected_components, Connectivity};

use crate::config::SeedConfig;
use crate::error::Result;
use crate::frame::{BoundingBox, Mask, Trimap, MASK_ON};
use crate::morphology;

#[derive(Debug, Clone)]
pub struct Seed {
    /// Pixel count of the connected component
    pub area: u32,
    pub foreground: Mask,
    pub unknown: Mask,
    pub background: Mask,
    /// Pixels belonging to none of the three regions
    pub mask: Mask,
    /// Component bounds grown by the dilation radius
    pub bbox: BoundingBox,
}

impl Seed {
    /// Merges several seeds into one covering all of them. Where the seeds
    /// disagree, foreground wins over unknown and unknown over background.
    pub fn merge(seeds: &[Seed]) -> Option<Seed> {
        let (first, rest) = seeds.split_first()?;
        let mut merged = first.clone();
        for seed in rest {
            merged.area += seed.area;
            merged.foreground = morphology::union(&merged.foreground, &seed.foreground);
            merged.unknown = morphology::union(&merged.unknown, &seed.unknown);
            merged.background = morphology::union(&merged.background, &seed.background);
            merged.bbox = merged.bbox.union(&seed.bbox);
        }
        if !rest.is_empty() {
            merged.unknown = morphology::difference(&merged.unknown, &merged.foreground);
            let decided = morphology::union(&merged.foreground, &merged.unknown);
            merged.background = morphology::difference(&merged.background, &decided);
            merged.mask = morphology::complement(&morphology::union(&decided, &merged.background));
        }
        Some(merged)
    }
}

struct Component {
    label: u32,
    area: u32,
    bbox: BoundingBox,
}

pub struct SeedExtractor {
    min_area: u32,
    dilation: u32,
    element: StructuringElement,
}

impl SeedExtractor {
    pub fn new(config: &SeedConfig) -> Self {
        Self {
            min_area: config.min_area,
            dilation: config.dilation,
            element: morphology::disk(config.dilation),
        }
    }

    pub fn set_minimum_size(&mut self, area: u32) {
        self.min_area = area;
    }

    pub fn set_dilation_size(&mut self, radius: u32) {
        self.dilation = radius;
        self.element = morphology::disk(radius);
    }

    /// Seeds for every retained component, largest first.
    pub fn extract(&self, trimap: &Trimap) -> Result<Vec<Seed>> {
        let _span = tracing::debug_span!("seeds").entered();
        trimap.check()?;

        let (width, height) = trimap.dimensions();
        let labels = connected_components(&trimap.foreground, Connectivity::Eight, Luma([0u8]));
        let mut components = self.components(&labels, width, height);
        tracing::debug!("{} foreground components above {} px", components.len(), self.min_area);

        components.sort_by(|a, b| b.area.cmp(&a.area).then(a.label.cmp(&b.label)));

        Ok(components
            .into_iter()
            .map(|component| self.build_seed(&labels, component, width, height))
            .collect())
    }

    fn components(&self, labels: &image::ImageBuffer<Luma<u32>, Vec<u32>>, width: u32, height: u32) -> Vec<Component> {
        let mut found: Vec<Option<Component>> = Vec::new();
        for (x, y, label) in labels.enumerate_pixels() {
            let label = label[0];
            if label == 0 {
                continue;
            }
            let index = label as usize;
            if found.len() <= index {
                found.resize_with(index + 1, || None);
            }
            match &mut found[index] {
                Some(component) => {
                    component.area += 1;
                    let bbox = &mut component.bbox;
                    bbox.x_min = bbox.x_min.min(x);
                    bbox.x_max = bbox.x_max.max(x);
                    bbox.y_min = bbox.y_min.min(y);
                    bbox.y_max = bbox.y_max.max(y);
                }
                slot => {
                    *slot = Some(Component {
                        label,
                        area: 1,
                        bbox: BoundingBox {
                            x_min: x,
                            x_max: x,
                            y_min: y,
                            y_max: y,
                        },
                    })
                }
            }
        }

        debug_assert!(found.iter().flatten().all(|c| c.bbox.fits(width, height)));
        found
            .into_iter()
            .flatten()
            .filter(|c| c.area >= self.min_area)
            .collect()
    }

    fn build_seed(
        &self,
        labels: &image::ImageBuffer<Luma<u32>, Vec<u32>>,
        component: Component,
        width: u32,
        height: u32,
    ) -> Seed {
        let foreground = Mask::from_fn(width, height, |x, y| {
            Luma([if labels.get_pixel(x, y)[0] == component.label { MASK_ON } else { 0 }])
        });

        let dilated = morphology::dilate(&foreground, &self.element);
        let unknown = morphology::difference(&dilated, &foreground);
        let ring = morphology::dilate(&dilated, &self.element);
        let background = morphology::difference(&ring, &dilated);
        let mask = morphology::complement(&ring);

        Seed {
            area: component.area,
            foreground,
            unknown,
            background,
            mask,
            bbox: component.bbox.expand(self.dilation, width, height),
        }
    }
}
