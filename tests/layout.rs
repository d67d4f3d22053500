// Layout conformance tests. Producer and consumers may be built separately,
// so the blocks stored in the region and the packet header must keep the
// offsets asserted here. The observed values are printed to help when a
// mismatch shows up on some platform.
use crossbeam_utils::CachePadded;
use memoffset::offset_of;
use station_ingest::Buffer::layout::{BoardControl, BufferLayout, RangeEntry, RegionHeader, BLOCK_ALIGN};
use station_ingest::{BitMode, BufferDescriptor, PacketHeader, StationConfig};
use std::mem::{align_of, size_of};
use std::sync::atomic::AtomicU64;

#[test]
fn test_buffer_descriptor_layout() {
    let size = size_of::<BufferDescriptor>();
    let align = align_of::<BufferDescriptor>();
    let off_version = offset_of!(BufferDescriptor, version);
    let off_key = offset_of!(BufferDescriptor, key);
    let off_station = offset_of!(BufferDescriptor, station);
    let off_station_id = offset_of!(BufferDescriptor, station_id);
    let off_bit_mode = offset_of!(BufferDescriptor, bit_mode);
    let off_cpb = offset_of!(BufferDescriptor, channels_per_board);
    let off_nr_boards = offset_of!(BufferDescriptor, nr_boards);
    let off_nr_ranges = offset_of!(BufferDescriptor, nr_ranges);
    let off_capacity = offset_of!(BufferDescriptor, capacity);

    println!(
        "BufferDescriptor => size: {size}, align: {align}, offsets: [version:{off_version}, key:{off_key}, station:{off_station}, station_id:{off_station_id}, bit_mode:{off_bit_mode}, channels_per_board:{off_cpb}, nr_boards:{off_nr_boards}, nr_ranges:{off_nr_ranges}, capacity:{off_capacity}]"
    );

    assert_eq!(size, 56);
    assert_eq!(align, align_of::<u64>());
    assert_eq!(off_version, 0);
    assert_eq!(off_key, 4);
    assert_eq!(off_station, 8);
    assert_eq!(off_station_id, 24);
    assert_eq!(off_bit_mode, 28);
    assert_eq!(off_cpb, 32);
    assert_eq!(off_nr_boards, 36);
    assert_eq!(off_nr_ranges, 40);
    assert_eq!(off_capacity, 48);
}

#[test]
fn test_region_header_layout() {
    let size = size_of::<RegionHeader>();
    let off_magic = offset_of!(RegionHeader, magic);
    let off_version = offset_of!(RegionHeader, layout_version);
    let off_state = offset_of!(RegionHeader, state);
    let off_pid = offset_of!(RegionHeader, creator_pid);
    let off_descriptor = offset_of!(RegionHeader, descriptor);

    println!(
        "RegionHeader => size: {size}, align: {}, offsets: [magic:{off_magic}, layout_version:{off_version}, state:{off_state}, creator_pid:{off_pid}, descriptor:{off_descriptor}]",
        align_of::<RegionHeader>()
    );

    assert_eq!(align_of::<RegionHeader>(), BLOCK_ALIGN);
    assert_eq!(size, BLOCK_ALIGN);
    assert_eq!(off_magic, 0);
    assert_eq!(off_version, 8);
    assert_eq!(off_state, 12);
    assert_eq!(off_pid, 16);
    assert_eq!(off_descriptor, 24);
}

#[test]
fn test_board_control_layout() {
    let pad = align_of::<CachePadded<AtomicU64>>();
    let off_sequence = offset_of!(BoardControl, sequence);
    let off_count = offset_of!(BoardControl, range_count);
    let off_head = offset_of!(BoardControl, head);
    let off_progress = offset_of!(BoardControl, progress);

    println!(
        "BoardControl => size: {}, align: {}, cache pad: {pad}, offsets: [sequence:{off_sequence}, range_count:{off_count}, head:{off_head}, progress:{off_progress}]",
        size_of::<BoardControl>(),
        align_of::<BoardControl>()
    );

    assert_eq!(off_sequence, 0);
    assert_eq!(off_count, 8);
    // head and progress each sit on their own cache line
    assert_eq!(off_head % pad, 0);
    assert_eq!(off_progress % pad, 0);
    assert!(off_head >= 16);
    assert!(off_progress >= off_head + pad);
    assert_eq!(size_of::<BoardControl>() % BLOCK_ALIGN, 0);
    assert_eq!(size_of::<RangeEntry>(), 16);
}

#[test]
fn test_packet_header_wire_layout() {
    let header = PacketHeader {
        version: 1,
        board: 3,
        bit_mode: 16,
        nr_channels: 61,
        nr_samples: 16,
        station_id: 7,
        time_index: 1 << 40,
        payload_len: 16 * 61 * 8,
        flags: 0,
    };
    let bytes = header.encode();
    assert_eq!(bytes.len(), 24);
    assert_eq!(bytes[1], 3);
    assert_eq!(u16::from_le_bytes([bytes[4], bytes[5]]), 16);
    assert_eq!(u16::from_le_bytes([bytes[6], bytes[7]]), 7);
    assert_eq!(u64::from_le_bytes(bytes[8..16].try_into().unwrap()), 1 << 40);
    assert_eq!(u32::from_le_bytes(bytes[16..20].try_into().unwrap()), 16 * 61 * 8);
}

#[test]
fn test_buffer_layout_blocks_are_aligned() {
    let station = StationConfig::new("CS001", 1)
        .with_bit_mode(BitMode::Sixteen)
        .with_boards(4, 61);
    let desc = BufferDescriptor::new(&station, 1000, 64).unwrap();
    let layout = BufferLayout::new(&desc).unwrap();
    println!("{:?}", layout);

    assert_eq!(layout.slot_bytes(), 61 * 8);
    assert_eq!(BufferLayout::header_offset(), 0);
    for board in 0..4 {
        assert_eq!(layout.board_offset(board) % BLOCK_ALIGN, 0);
        assert_eq!(layout.board_data_offset(board) % BLOCK_ALIGN, 0);
        assert_eq!(layout.range_offset(board, 0) % 16, 0);
    }
    // Range tables come after every control block, sample areas after every table.
    assert!(layout.range_offset(0, 0) >= layout.board_offset(3) + size_of::<BoardControl>());
    assert!(layout.board_data_offset(0) >= layout.range_offset(3, 63) + size_of::<RangeEntry>());
    assert!(layout.total_size() >= layout.board_data_offset(3) + 1000 * 61 * 8);
}
