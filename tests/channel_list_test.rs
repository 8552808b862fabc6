//! Channel-list parsing against both addressing schemes.

use scpi_bench::addressing::{AddressingScheme, CardType, FlatBankScheme, SlotRelativeScheme};
use scpi_bench::channel_list::{parse, ChannelList, ChannelRef};
use scpi_bench::error::ChannelListErrorKind;

fn bank() -> FlatBankScheme {
    FlatBankScheme::new(101, 399)
}

fn mainframe() -> SlotRelativeScheme {
    SlotRelativeScheme::new([
        CardType::Card3720,
        CardType::Card3721,
        CardType::Empty,
        CardType::Empty,
        CardType::Empty,
        CardType::Empty,
    ])
}

#[test]
fn test_mixed_list_keeps_order() {
    let scheme = bank();
    let list = parse("305, 101 ,201 : 205", &scheme).unwrap();
    assert_eq!(
        list.items(),
        &[
            ChannelRef::Single(305),
            ChannelRef::Single(101),
            ChannelRef::Range { from: 201, to: 205 },
        ]
    );
    assert_eq!(list.channel_count(), 7);
    assert_eq!(scheme.format(&list), "(@305,101,201:205)");
}

#[test]
fn test_single_and_point_range() {
    let scheme = bank();
    assert_eq!(scheme.format(&parse("101", &scheme).unwrap()), "(@101)");
    let point = parse("150:150", &scheme).unwrap();
    assert_eq!(point.channel_count(), 1);
    assert_eq!(point.channels().collect::<Vec<_>>(), vec![150]);
}

#[test]
fn test_bank_edges() {
    let scheme = bank();
    assert!(parse("101:399", &scheme).is_ok());
    assert!(matches!(
        parse("100", &scheme).unwrap_err().kind,
        ChannelListErrorKind::InvalidChannel(100)
    ));
    assert!(matches!(
        parse("101:400", &scheme).unwrap_err().kind,
        ChannelListErrorKind::InvalidChannel(400)
    ));
}

#[test]
fn test_descending_range_rejected() {
    let err = parse("205:201", &bank()).unwrap_err();
    assert!(matches!(
        err.kind,
        ChannelListErrorKind::RangeOrder { from: 205, to: 201 }
    ));
}

#[test]
fn test_malformed_lists_rejected() {
    let scheme = bank();
    for text in ["", "   ", "101,", ",101", "101,,102", "1a1", "101:", ":105", "101:102:103", "-101"] {
        assert!(parse(text, &scheme).is_err(), "accepted {:?}", text);
    }
}

#[test]
fn test_error_names_offending_item() {
    let err = parse("101,2x1,103", &bank()).unwrap_err();
    assert_eq!(err.item.trim(), "2x1");
}

#[test]
fn test_slot_relative_format_is_quoted() {
    let scheme = mainframe();
    let list = ChannelList::parse("1001:1005,2042", &scheme).unwrap();
    assert_eq!(scheme.format(&list), "\"1001:1005,2042\"");
}

#[test]
fn test_slot_relative_rejects_empty_slot_and_ceiling() {
    let scheme = mainframe();
    assert!(ChannelList::parse("3001", &scheme).is_err());
    assert!(ChannelList::parse("1061", &scheme).is_err());
    assert!(ChannelList::parse("2001:2043", &scheme).is_err());
    assert!(ChannelList::parse("1911,2916", &scheme).is_ok());
}

#[test]
fn test_wider_single_bound_of_34972() {
    let scheme = FlatBankScheme::agilent_34972();
    assert!(parse("420", &scheme).is_ok());
    assert!(parse("101:420", &scheme).is_err());
}
