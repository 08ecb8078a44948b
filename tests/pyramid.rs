//! End-to-end tile resolution over an in-memory GeoTIFF pyramid

use std::io::Cursor;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use cogtile::{
    CogHandle, CogOptions, MemoryRangeReader, RasterHandle, RasterOpener, ReaderConfig,
    ResolveOptions, Result, Samples, TileAddress, TileError, TileKind, TileResolver,
    tile_to_mercator_bbox,
};
use tiff::encoder::{TiffEncoder, colortype};
use tiff::tags::Tag;

const SOURCE: &str = "mem://pyramid.tif";
const NO_DATA: u16 = 9999;

/// Raster extent: exactly tile 6/40/20
fn extent() -> cogtile::BoundingBox {
    tile_to_mercator_bbox(6, 40, 20)
}

/// 64x64 base image plus 32 and 16 pixel overviews.
/// Pixel value is `level * 1000 + column`.
fn pyramid_tiff(with_overviews: bool) -> Vec<u8> {
    let bbox = extent();
    let scale = bbox.width() / 64.0;
    let sizes: &[u32] = if with_overviews { &[64, 32, 16] } else { &[64] };

    let mut bytes = Cursor::new(Vec::new());
    {
        let mut encoder = TiffEncoder::new(&mut bytes).unwrap();
        for (level, &size) in sizes.iter().enumerate() {
            let mut image = encoder.new_image::<colortype::Gray16>(size, size).unwrap();
            image.rows_per_strip(8).unwrap();
            let dir = image.encoder();
            if level == 0 {
                dir.write_tag(Tag::ModelPixelScaleTag, &[scale, scale, 0.0][..])
                    .unwrap();
                dir.write_tag(
                    Tag::ModelTiepointTag,
                    &[0.0, 0.0, 0.0, bbox.minx, bbox.maxy, 0.0][..],
                )
                .unwrap();
                dir.write_tag(Tag::from_u16_exhaustive(42113), NO_DATA.to_string().as_str())
                    .unwrap();
                dir.write_tag(
                    Tag::from_u16_exhaustive(42112),
                    r#"<GDALMetadata><Item name="OFFSET" sample="0" role="offset">-5</Item><Item name="SCALE" sample="0" role="scale">0.1</Item></GDALMetadata>"#,
                )
                .unwrap();
                dir.write_tag(Tag::Artist, "cogtile tests").unwrap();
            } else {
                dir.write_tag(Tag::from_u16_exhaustive(254), 1_u32).unwrap();
            }
            let data: Vec<u16> = (0..size * size)
                .map(|i| (level as u32 * 1000 + i % size) as u16)
                .collect();
            image.write_data(&data).unwrap();
        }
    }
    bytes.into_inner()
}

/// Opens every source from the same in-memory bytes
struct MemoryOpener {
    bytes: Arc<Vec<u8>>,
    opens: AtomicUsize,
}

impl MemoryOpener {
    fn new(bytes: Vec<u8>) -> Self {
        Self {
            bytes: Arc::new(bytes),
            opens: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl RasterOpener for MemoryOpener {
    async fn open(&self, source_id: &str) -> Result<Arc<dyn RasterHandle>> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        let reader = Arc::new(MemoryRangeReader::new(source_id, Arc::clone(&self.bytes)));
        let handle = CogHandle::from_reader(reader, CogOptions::default())
            .map_err(|e| TileError::source_open(source_id, e))?;
        Ok(Arc::new(handle))
    }
}

fn resolver(coverage: bool) -> (TileResolver, Arc<MemoryOpener>) {
    let opener = Arc::new(MemoryOpener::new(pyramid_tiff(true)));
    let config = ReaderConfig {
        coverage,
        ..ReaderConfig::default()
    };
    (TileResolver::new(opener.clone(), config).unwrap(), opener)
}

fn u16_samples(samples: &Samples) -> &[u16] {
    match samples {
        Samples::U16(values) => values,
        other => panic!("expected u16 samples, got {:?}", other.sample_type()),
    }
}

#[tokio::test]
async fn metadata_from_geotiff_tags() {
    let (resolver, _) = resolver(false);
    let metadata = resolver.metadata(SOURCE).await.unwrap();

    assert_eq!(metadata.scale, 0.1);
    assert_eq!(metadata.offset, -5.0);
    assert_eq!(metadata.no_data, Some(f64::from(NO_DATA)));
    assert_eq!(metadata.artist.as_deref(), Some("cogtile tests"));
    assert_eq!(metadata.bits_per_sample, vec![16]);
    assert_eq!(metadata.samples_per_pixel, 1);

    // 64 px over a zoom-6 tile is 1/4096 of the world per pixel, the
    // resolution of a 256 px zoom-4 tile; overviews are zoom 3 and 2
    assert_eq!(metadata.levels.len(), 3);
    assert_eq!(metadata.levels[0].zoom, 4);
    assert_eq!(metadata.levels[1].zoom, 3);
    assert_eq!(metadata.max_available_zoom, 3);
    assert_eq!(metadata.min_available_zoom, 2);
    assert!(metadata.is_below_pyramid(0));
    assert!(!metadata.is_below_pyramid(1));

    let geo = metadata.geographic_bbox;
    assert!(geo.minx < geo.maxx && geo.miny < geo.maxy);
}

#[tokio::test]
async fn decodes_tile_from_coarsest_sufficient_overview() {
    let (resolver, _) = resolver(false);
    let tile = resolver
        .resolve_tile(SOURCE, TileAddress::new(6, 40, 20).unwrap(), 8)
        .await
        .unwrap();

    assert_eq!(tile.buffer.kind, TileKind::Decoded);
    let values = u16_samples(&tile.buffer.samples);
    assert_eq!(values.len(), 64);
    // The 16 px overview, every second column
    assert_eq!(&values[..8], &[2000, 2002, 2004, 2006, 2008, 2010, 2012, 2014]);
    assert_eq!(&values[56..], &values[..8]);
}

#[tokio::test]
async fn pixels_outside_extent_use_no_data() {
    let (resolver, _) = resolver(false);

    // Zoom-5 parent: the raster fills its north-west quarter
    let tile = resolver
        .resolve_tile(SOURCE, TileAddress::new(5, 20, 10).unwrap(), 8)
        .await
        .unwrap();
    let values = u16_samples(&tile.buffer.samples);
    assert_eq!(&values[..4], &[2000, 2004, 2008, 2012]);
    assert!(values[4..8].iter().all(|&v| v == NO_DATA));
    assert!(values[32..].iter().all(|&v| v == NO_DATA));

    // A neighbour with no overlap is entirely no-data
    let tile = resolver
        .resolve_tile(SOURCE, TileAddress::new(6, 41, 20).unwrap(), 8)
        .await
        .unwrap();
    assert!(u16_samples(&tile.buffer.samples).iter().all(|&v| v == NO_DATA));
}

#[tokio::test]
async fn concurrent_requests_share_one_buffer() {
    let (resolver, opener) = resolver(false);
    let address = TileAddress::new(7, 80, 40).unwrap();

    let (a, b, c) = tokio::join!(
        resolver.resolve_tile(SOURCE, address, 16),
        resolver.resolve_tile(SOURCE, address, 16),
        resolver.resolve_tile(SOURCE, address, 16),
    );
    let (a, b, c) = (a.unwrap(), b.unwrap(), c.unwrap());

    assert!(a.buffer.shares_samples_with(&b.buffer));
    assert!(a.buffer.shares_samples_with(&c.buffer));
    assert_eq!(opener.opens.load(Ordering::SeqCst), 1);
    assert_eq!(resolver.cache_stats().tiles, 1);
}

#[tokio::test]
async fn far_zooms_get_coverage_or_empty_tiles() {
    let (resolver, opener) = resolver(true);
    // Only zoom 0 is more than one level below the coarsest overview (zoom 2)
    let address = TileAddress::new(0, 0, 0).unwrap();

    let tile = resolver.resolve_tile(SOURCE, address, 64).await.unwrap();
    assert_eq!(tile.buffer.kind, TileKind::Coverage);
    // Tile 6/40/20 spans columns 39..=40 and rows 20..=21 of the world tile
    assert_eq!(tile.buffer.sample(39, 20, 0), Some(255.0));
    assert_eq!(tile.buffer.sample(40, 21, 0), Some(255.0));
    assert_eq!(tile.buffer.sample(0, 0, 0), Some(0.0));
    assert_eq!(tile.buffer.sample(41, 20, 0), Some(0.0));

    let options = ResolveOptions {
        tile_size: 16,
        coverage: false,
    };
    let tile = resolver.resolve_tile_with(SOURCE, address, options).await.unwrap();
    assert_eq!(tile.buffer.kind, TileKind::Empty);
    assert!(tile.buffer.samples.is_all_zero());
    assert_eq!(resolver.cache_stats().tiles, 0);

    // Zoom 1 sits just inside the guard and decodes
    let tile = resolver
        .resolve_tile(SOURCE, TileAddress::new(1, 1, 0).unwrap(), 16)
        .await
        .unwrap();
    assert_eq!(tile.buffer.kind, TileKind::Decoded);
    assert_eq!(opener.opens.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn raster_without_overviews_is_a_metadata_error() {
    let opener = Arc::new(MemoryOpener::new(pyramid_tiff(false)));
    let resolver = TileResolver::with_defaults(opener);

    let err = resolver
        .resolve_tile(SOURCE, TileAddress::new(6, 40, 20).unwrap(), 256)
        .await
        .unwrap_err();
    assert!(matches!(err, TileError::Metadata { .. }));
}

#[tokio::test]
async fn unreadable_bytes_fail_to_open() {
    let opener = Arc::new(MemoryOpener::new(b"not a tiff".to_vec()));
    let resolver = TileResolver::with_defaults(opener);

    let err = resolver.metadata(SOURCE).await.unwrap_err();
    assert!(matches!(err, TileError::SourceOpen { .. }));
}
