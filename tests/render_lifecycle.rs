use chrono::{DateTime, Utc};
use halation::{
    CaptureMetadata, DeviceOrientation, Extent, FilterParameters, Image, RenderTier, Renderer,
    ResourceBundle,
};

fn metadata() -> CaptureMetadata {
    CaptureMetadata::new(
        DateTime::parse_from_rfc3339("2003-01-05T23:59:00Z")
            .unwrap()
            .with_timezone(&Utc),
        DeviceOrientation::LandscapeLeft,
        true,
    )
}

#[test]
fn repeated_encodes_do_not_grow_the_context_cache() {
    let mut renderer = Renderer::new().unwrap();
    let source = Image::solid(Extent::new(160, 120), [130, 110, 90, 255]);

    let mut params = FilterParameters::default();
    params.vignette_intensity = 0.4;

    let rendered = renderer
        .render(
            RenderTier::Low,
            &source,
            &metadata(),
            &params,
            &ResourceBundle::default(),
        )
        .unwrap();

    let baseline = renderer.context(RenderTier::Low).cache_stats();
    assert_eq!(baseline.retained_bytes, 0);

    for _ in 0..16 {
        renderer
            .encode_to_bytes(RenderTier::Low, &rendered, 0.8)
            .unwrap();
        let stats = renderer.context(RenderTier::Low).cache_stats();
        assert_eq!(stats.retained_buffers, 0);
        assert_eq!(stats.retained_bytes, 0);
    }
}

#[test]
fn each_tier_clears_independently() {
    let mut renderer = Renderer::new().unwrap();
    let img = Image::solid(Extent::new(32, 32), [10, 20, 30, 255]);

    renderer.encode_to_bytes(RenderTier::Full, &img, 0.9).unwrap();
    renderer.encode_png(RenderTier::Thumbnail, &img).unwrap();
    let _ = renderer.encode_to_buffer(RenderTier::Low, &img).unwrap();

    for tier in [RenderTier::Full, RenderTier::Low, RenderTier::Thumbnail] {
        let stats = renderer.context(tier).cache_stats();
        assert_eq!(stats.retained_bytes, 0, "tier {tier:?} retained memory");
    }
}

#[test]
fn png_thumbnails_decode_back_to_the_same_extent() {
    let mut renderer = Renderer::new().unwrap();
    let source = Image::solid(Extent::new(640, 480), [90, 120, 150, 255]);

    let thumb = renderer
        .render(
            RenderTier::Thumbnail,
            &source,
            &metadata(),
            &FilterParameters::default(),
            &ResourceBundle::default(),
        )
        .unwrap();
    assert_eq!(thumb.extent(), Extent::new(256, 192));

    let bytes = renderer.encode_png(RenderTier::Thumbnail, &thumb).unwrap();
    let decoded = image::load_from_memory(&bytes).unwrap();
    assert_eq!(decoded.width(), 256);
    assert_eq!(decoded.height(), 192);
}
