use tracing::instrument;

use crate::{
    error::HalationResult,
    image::Image,
    metadata::CaptureMetadata,
    params::FilterParameters,
    render::{RenderTier, Renderer},
    resources::{ResourceBundle, ResourceLoader},
};

/// Resolve resources and render one photo.
///
/// This is the primary "one-shot" API for producing a filtered image.
///
/// Pipeline:
/// 1. [`ResourceBundle::resolve`] (reusing `previous` sub-resources whose
///    identity is unchanged)
/// 2. [`Renderer::render`] over the composed effect chain
///
/// Returns the rendered image together with the resolved bundle, which the
/// caller keeps for the next incremental re-resolution.
#[instrument(skip_all, fields(tier = ?tier))]
pub fn render_photo(
    renderer: &mut Renderer,
    tier: RenderTier,
    source: &Image,
    metadata: &CaptureMetadata,
    params: &FilterParameters,
    loader: &dyn ResourceLoader,
    previous: Option<&ResourceBundle>,
) -> HalationResult<(Image, ResourceBundle)> {
    let resources = ResourceBundle::resolve(loader, params, previous)?;
    let image = renderer.render(tier, source, metadata, params, &resources)?;
    Ok((image, resources))
}
