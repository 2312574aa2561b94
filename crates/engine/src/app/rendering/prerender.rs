use tracing::{debug, info};

use crate::content::AssetProvider;
use crate::stage::{ElementId, ElementKind, ElementSpec, ImageSource, Stage};

use super::renderer::frame_image;
use super::surface::{DestRect, DrawingSurface, RasterSurface, SourceRect};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PrerenderReport {
    pub folded_elements: usize,
    pub composites: usize,
}

struct Candidate {
    id: ElementId,
    x: i32,
    y: i32,
    width: u32,
    height: u32,
}

/// Folds runs of adjacent static immutable tiles within one bucket depth
/// section into a composite element each. Any other element in the section
/// ends a run, so paint order is unchanged. Run once after the stage is
/// populated.
pub fn prerender(stage: &mut Stage, assets: &dyn AssetProvider) -> PrerenderReport {
    let mut report = PrerenderReport::default();
    for cell in stage.buckets().cells() {
        for (z, ids) in stage.buckets().sections(cell) {
            for run in static_tile_runs(stage, assets, &ids) {
                if run.len() < 2 {
                    continue;
                }
                let (width, height) = fold_run(stage, assets, &run, z);
                debug!(
                    row = cell.0,
                    column = cell.1,
                    z,
                    folded = run.len(),
                    width,
                    height,
                    "bucket_section_prerendered"
                );
                report.folded_elements += run.len();
                report.composites += 1;
            }
        }
    }
    info!(
        folded = report.folded_elements,
        composites = report.composites,
        "prerender_complete"
    );
    report
}

fn fold_run(
    stage: &mut Stage,
    assets: &dyn AssetProvider,
    run: &[Candidate],
    z: i32,
) -> (u32, u32) {
    let left = run.iter().map(|c| c.x).min().unwrap_or(0);
    let top = run.iter().map(|c| c.y).min().unwrap_or(0);
    let right = run
        .iter()
        .map(|c| c.x + c.width as i32)
        .max()
        .unwrap_or(left);
    let bottom = run
        .iter()
        .map(|c| c.y + c.height as i32)
        .max()
        .unwrap_or(top);
    let width = (right - left) as u32;
    let height = (bottom - top) as u32;

    let mut surface = RasterSurface::new(width, height);
    surface.translate(-f64::from(left), -f64::from(top));
    for candidate in run {
        blit_element(stage, assets, &mut surface, candidate);
    }
    let (index, animation) = stage.add_prerendered(surface.into_image());
    let anchor = run.first().map(|candidate| candidate.id);
    let element = stage.buckets_mut().insert_before(
        ElementSpec {
            kind: ElementKind::Prerendered(index),
            animation,
            x: left,
            y: top,
            z,
            width,
            height,
            time_origin: 0.0,
        },
        anchor,
    );
    let tiles: Vec<ElementId> = run.iter().map(|candidate| candidate.id).collect();
    stage.fold_tiles(index, element, &tiles);
    (width, height)
}

/// Splits a section into maximal runs of consecutive foldable tiles.
fn static_tile_runs(
    stage: &Stage,
    assets: &dyn AssetProvider,
    ids: &[ElementId],
) -> Vec<Vec<Candidate>> {
    let mut runs = vec![Vec::new()];
    for id in ids {
        match foldable_tile(stage, assets, *id) {
            Some(candidate) => {
                if let Some(run) = runs.last_mut() {
                    run.push(candidate);
                }
            }
            None => {
                if runs.last().is_some_and(|run| !run.is_empty()) {
                    runs.push(Vec::new());
                }
            }
        }
    }
    runs
}

fn foldable_tile(stage: &Stage, assets: &dyn AssetProvider, id: ElementId) -> Option<Candidate> {
    let element = stage.buckets().element(id)?;
    if !matches!(element.kind(), ElementKind::Tile { mutable: false, .. }) {
        return None;
    }
    let animation = stage.frames().animation(element.animation())?;
    if !animation.is_static() {
        return None;
    }
    let frame = animation.frame_at(0.0);
    if !matches!(frame.source, ImageSource::Asset(_))
        || frame_image(stage, assets, &frame.source).is_none()
    {
        return None;
    }
    let (x, y, _) = element.position();
    Some(Candidate {
        id,
        x,
        y,
        width: frame.width,
        height: frame.height,
    })
}

fn blit_element(
    stage: &Stage,
    assets: &dyn AssetProvider,
    surface: &mut RasterSurface,
    candidate: &Candidate,
) {
    let Some(frame) = stage
        .buckets()
        .element(candidate.id)
        .and_then(|element| stage.frames().resolve(element.animation(), 0.0))
    else {
        return;
    };
    let Some(image) = frame_image(stage, assets, &frame.source) else {
        return;
    };
    surface.draw_image(
        image,
        SourceRect {
            x: frame.sx,
            y: frame.sy,
            width: frame.width,
            height: frame.height,
        },
        DestRect {
            x: f64::from(candidate.x),
            y: f64::from(candidate.y),
            width: f64::from(candidate.width),
            height: f64::from(candidate.height),
        },
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::rendering::StageRenderer;
    use crate::stage::test_support::{yard_assets, yard_stage};
    use crate::stage::{Element, TileCoord};

    const GRASS: [u8; 4] = [40, 160, 60, 255];

    fn snapshot(stage: &Stage, timestamp: f64) -> Vec<u8> {
        let assets = yard_assets();
        let mut renderer = StageRenderer::new();
        let mut surface = RasterSurface::new(64, 64);
        renderer.render(stage, &mut surface, &assets, timestamp);
        surface.into_image().into_raw()
    }

    #[test]
    fn folding_static_tiles_keeps_pixels_identical() {
        let overrides = [((1, 1), "wall"), ((2, 3), "sand"), ((4, 0), "water")];
        let mut stage = yard_stage(8, &overrides);
        for origin in [(0.0, 0.0), (-20.0, -12.0)] {
            stage.view_mut().drag_to(origin.0, origin.1);
            let before = snapshot(&stage, 150.0);
            let elements_before = stage.buckets().len();

            let report = prerender(&mut stage, &yard_assets());
            let after = snapshot(&stage, 150.0);
            assert!(before == after, "pixels changed at origin {origin:?}");
            if report.composites > 0 {
                assert!(stage.buckets().len() < elements_before);
            }
        }
        assert!(stage.prerendered_count() > 0);
        assert!(stage.buckets().has_eraser(TileCoord::new(1, 1, 0)));
    }

    #[test]
    fn mutable_and_animated_tiles_stay_separate() {
        let overrides = [((0, 0), "wall"), ((0, 1), "water")];
        let mut stage = yard_stage(2, &overrides);
        let report = prerender(&mut stage, &yard_assets());
        assert_eq!(report.folded_elements, 2);
        assert_eq!(report.composites, 1);
        let kinds: Vec<ElementKind> = stage
            .buckets()
            .elements()
            .map(|(_, element)| element.kind())
            .collect();
        assert!(kinds.contains(&ElementKind::Prerendered(0)));
        assert_eq!(
            kinds
                .iter()
                .filter(|kind| matches!(kind, ElementKind::Tile { .. }))
                .count(),
            2
        );
    }

    fn pixel(stage: &Stage, x: u32, y: u32) -> [u8; 4] {
        let assets = yard_assets();
        let mut surface = RasterSurface::new(64, 64);
        StageRenderer::new().render(stage, &mut surface, &assets, 0.0);
        surface.pixel(x, y).expect("inside viewport")
    }

    fn composite_count(stage: &Stage) -> usize {
        stage
            .buckets()
            .elements()
            .filter(|(_, element)| matches!(element.kind(), ElementKind::Prerendered(_)))
            .count()
    }

    #[test]
    fn editing_a_folded_tile_splits_its_composite() {
        let mut stage = yard_stage(2, &[]);
        let report = prerender(&mut stage, &yard_assets());
        assert_eq!(report.composites, 1);
        assert_eq!(stage.buckets().len(), 3);
        assert_eq!(pixel(&stage, 24, 24), GRASS);

        assert!(stage.remove_tile(TileCoord::new(1, 1, 0)));
        assert_eq!(pixel(&stage, 24, 24), [0, 0, 0, 0]);
        assert_eq!(pixel(&stage, 8, 24), GRASS);
        assert_eq!(composite_count(&stage), 0);
        assert_eq!(stage.buckets().len(), 5);

        stage
            .put_tile(TileCoord::new(0, 0, 0), "sand")
            .expect("sand");
        assert_eq!(pixel(&stage, 8, 8), [200, 180, 120, 255]);
        assert_eq!(stage.buckets().len(), 5);
    }

    #[test]
    fn interleaved_mutable_tile_keeps_paint_order() {
        let mut stage = yard_stage(2, &[((0, 1), "wall")]);
        let report = prerender(&mut stage, &yard_assets());
        assert_eq!(
            report,
            PrerenderReport {
                folded_elements: 2,
                composites: 1,
            }
        );

        let (_, ids) = stage
            .buckets()
            .sections((0, 0))
            .into_iter()
            .find(|(z, _)| *z == 0)
            .expect("layer 0 section");
        let kinds: Vec<ElementKind> = ids
            .iter()
            .filter_map(|id| stage.buckets().element(*id))
            .map(Element::kind)
            .collect();
        assert_eq!(
            &kinds[..3],
            &[
                ElementKind::Tile {
                    coord: TileCoord::new(0, 0, 0),
                    mutable: false,
                },
                ElementKind::Tile {
                    coord: TileCoord::new(0, 1, 0),
                    mutable: true,
                },
                ElementKind::Prerendered(0),
            ]
        );
    }

    #[test]
    fn missing_images_are_not_folded() {
        let mut stage = yard_stage(3, &[]);
        let report = prerender(&mut stage, &crate::content::ImageAssets::new());
        assert_eq!(report, PrerenderReport::default());
        assert_eq!(stage.prerendered_count(), 0);
    }
}
