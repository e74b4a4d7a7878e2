use datastore_cache::chunk::{chunks_for_request, map_request, ArrayExtents};
use datastore_cache::request::Point;
use datastore_cache::{ArrayData, ChunkCodec, ElementType, NoCompression, Request, StorageError};
use std::collections::BTreeSet;

const ALL_TYPES: [ElementType; 6] = [
    ElementType::Byte,
    ElementType::Short,
    ElementType::Int,
    ElementType::Long,
    ElementType::Float,
    ElementType::Double,
];

fn sample(element_type: ElementType, len: usize) -> ArrayData {
    match element_type {
        ElementType::Byte => (0..len).map(|v| (v % 251) as i8).collect::<Vec<_>>().into(),
        ElementType::Short => (0..len).map(|v| v as i16 - 300).collect::<Vec<_>>().into(),
        ElementType::Int => (0..len).map(|v| (v * 7) as i32 - 50).collect::<Vec<_>>().into(),
        ElementType::Long => (0..len).map(|v| (v as i64) << 33).collect::<Vec<_>>().into(),
        ElementType::Float => (0..len).map(|v| v as f32 * 0.5).collect::<Vec<_>>().into(),
        ElementType::Double => (0..len).map(|v| v as f64 / 3.0).collect::<Vec<_>>().into(),
    }
}

/// 10x10 grid where the value is `y * 10 + x`
fn grid() -> (ArrayData, ArrayExtents) {
    let data: Vec<i32> = (0..100).collect();
    (data.into(), ArrayExtents::from_record_sizes(&[10, 10]).unwrap())
}

#[test]
fn test_round_trip_all_types_and_shapes() {
    let codec = ChunkCodec::new(4).unwrap();
    let shapes: [&[usize]; 6] = [&[10], &[40], &[3, 5], &[9, 7], &[2, 2, 3], &[5, 6, 7]];

    for element_type in ALL_TYPES {
        for sizes in shapes {
            let len: usize = sizes.iter().product();
            let data = sample(element_type, len);
            let extents = ArrayExtents::from_record_sizes(sizes).unwrap();

            let record = codec.forward(&data, &extents).unwrap();
            assert_eq!(record.element_type, element_type);
            assert_eq!(record.num_elements(), len);
            if len <= 16 {
                assert_eq!(record.chunks.len(), 1, "{:?} {:?}", element_type, sizes);
            }
            assert_eq!(codec.assemble(&record).unwrap(), data, "{:?} {:?}", element_type, sizes);
        }
    }
}

#[test]
fn test_tiling_covers_every_element_once() {
    let codec = ChunkCodec::new(4).unwrap();
    let (data, extents) = grid();
    let record = codec.forward(&data, &extents).unwrap();

    assert_eq!(record.chunks.len(), 9);
    let covered: usize = record.chunks.iter().map(|c| c.num_elements()).sum();
    assert_eq!(covered, 100);

    let indices: Vec<usize> = record.chunks.iter().map(|c| c.index).collect();
    assert_eq!(indices, (0..9).collect::<Vec<_>>());

    // Edge chunks are clipped to the array
    let last = record.chunks.last().unwrap();
    assert_eq!(last.offsets, vec![8, 8]);
    assert_eq!(last.sizes, vec![2, 2]);
}

#[test]
fn test_slab_touches_only_overlapping_chunks() {
    let codec = ChunkCodec::new(4).unwrap();
    let (data, extents) = grid();
    let record = codec.forward(&data, &extents).unwrap();

    let slab = Request::Slab {
        min: Point::new(3, 3),
        max: Point::new(7, 7),
    };
    assert_eq!(
        chunks_for_request(&record, &slab).unwrap(),
        BTreeSet::from([0, 1, 3, 4])
    );

    let mapped = map_request(&codec, &record, &slab).unwrap();
    assert_eq!(mapped.sizes, vec![4, 4]);
    let expected: Vec<i32> = (3..7)
        .flat_map(|y| (3..7).map(move |x| y * 10 + x))
        .collect();
    assert_eq!(mapped.data, ArrayData::Int(expected));
}

#[test]
fn test_slab_max_corner_is_clamped() {
    let codec = ChunkCodec::new(4).unwrap();
    let (data, extents) = grid();
    let record = codec.forward(&data, &extents).unwrap();

    let slab = Request::Slab {
        min: Point::new(8, 9),
        max: Point::new(50, 50),
    };
    let mapped = map_request(&codec, &record, &slab).unwrap();
    assert_eq!(mapped.sizes, vec![2, 1]);
    assert_eq!(mapped.data, ArrayData::Int(vec![98, 99]));
}

#[test]
fn test_points_and_lines_across_chunk_boundaries() {
    let codec = ChunkCodec::new(4).unwrap();
    let (data, extents) = grid();
    let record = codec.forward(&data, &extents).unwrap();

    let points = Request::Points(vec![Point::new(9, 9), Point::new(0, 0), Point::new(4, 3)]);
    let mapped = map_request(&codec, &record, &points).unwrap();
    assert_eq!(mapped.sizes, vec![1, 3]);
    assert_eq!(mapped.data, ArrayData::Int(vec![99, 0, 34]));

    let rows = Request::RowLine(vec![5, 1]);
    let mapped = map_request(&codec, &record, &rows).unwrap();
    assert_eq!(mapped.sizes, vec![10, 2]);
    let expected: Vec<i32> = (50..60).chain(10..20).collect();
    assert_eq!(mapped.data, ArrayData::Int(expected));

    let columns = Request::ColumnLine(vec![7, 2]);
    let mapped = map_request(&codec, &record, &columns).unwrap();
    assert_eq!(mapped.sizes, vec![2, 10]);
    let expected: Vec<i32> = (0..10).flat_map(|y| [y * 10 + 7, y * 10 + 2]).collect();
    assert_eq!(mapped.data, ArrayData::Int(expected));
}

#[test]
fn test_single_chunk_matches_forced_tiling() {
    let codec = ChunkCodec::new(4).unwrap();
    let data = sample(ElementType::Double, 15);
    let extents = ArrayExtents::from_record_sizes(&[5, 3]).unwrap();

    let single = codec.forward(&data, &extents).unwrap();
    let tiled = codec.tile(&data, &extents).unwrap();
    assert_eq!(single.chunks.len(), 1);
    assert_eq!(tiled.chunks.len(), 2);

    let requests = [
        Request::All,
        Request::Points(vec![Point::new(4, 2), Point::new(3, 0)]),
        Request::RowLine(vec![2]),
        Request::ColumnLine(vec![4, 0]),
        Request::Slab {
            min: Point::new(2, 1),
            max: Point::new(5, 3),
        },
    ];
    for request in &requests {
        assert_eq!(
            map_request(&codec, &single, request).unwrap(),
            map_request(&codec, &tiled, request).unwrap(),
            "{:?}",
            request
        );
    }
}

#[test]
fn test_stale_precomputed_indices_fall_back_to_arithmetic() {
    let codec = ChunkCodec::new(4).unwrap();
    let (data, extents) = grid();
    let mut record = codec.forward(&data, &extents).unwrap();
    record.chunk_indices = Some(vec![0; 100]);

    let points = Request::Points(vec![Point::new(9, 9), Point::new(5, 0)]);
    let mapped = map_request(&codec, &record, &points).unwrap();
    assert_eq!(mapped.data, ArrayData::Int(vec![99, 5]));
}

#[test]
fn test_invalid_requests_are_rejected() {
    let codec = ChunkCodec::new(4).unwrap();
    let (data, extents) = grid();
    let record = codec.forward(&data, &extents).unwrap();

    let out_of_bounds = Request::Points(vec![Point::new(10, 0)]);
    assert!(matches!(
        map_request(&codec, &record, &out_of_bounds),
        Err(StorageError::OutOfBounds { .. })
    ));

    let duplicate = Request::RowLine(vec![1, 1]);
    assert!(matches!(
        map_request(&codec, &record, &duplicate),
        Err(StorageError::InvalidRequest(_))
    ));

    let cube = codec
        .forward(
            &sample(ElementType::Int, 60),
            &ArrayExtents::from_record_sizes(&[3, 4, 5]).unwrap(),
        )
        .unwrap();
    assert!(matches!(
        map_request(&codec, &cube, &Request::RowLine(vec![0])),
        Err(StorageError::UnsupportedRequest(_))
    ));
}

#[test]
fn test_corrupt_chunk_is_reported() {
    let codec = ChunkCodec::new(4).unwrap();
    let (data, extents) = grid();
    let mut record = codec.forward(&data, &extents).unwrap();
    record.chunks[4].compressed = vec![1, 2, 3];

    let slab = Request::Slab {
        min: Point::new(4, 4),
        max: Point::new(6, 6),
    };
    let result = map_request(&codec, &record, &slab);
    assert!(matches!(
        result,
        Err(StorageError::Decompression(_)) | Err(StorageError::Corrupt(_))
    ));
}

#[test]
fn test_chunks_hold_big_endian_values() {
    let codec = ChunkCodec::with_compression(2, NoCompression).unwrap();
    let data = ArrayData::from(vec![1i16, -2, 3, 0x0102, 5]);
    let extents = ArrayExtents::from_record_sizes(&[5]).unwrap();

    let record = codec.tile(&data, &extents).unwrap();
    assert_eq!(record.chunks.len(), 3);
    assert_eq!(record.chunks[0].compressed, vec![0x00, 0x01, 0xff, 0xfe]);
    assert_eq!(record.chunks[1].compressed, vec![0x00, 0x03, 0x01, 0x02]);
    assert_eq!(record.chunks[2].compressed, vec![0x00, 0x05]);
    assert_eq!(codec.assemble(&record).unwrap(), data);
}
