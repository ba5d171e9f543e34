//! End-to-end scenarios exercising the public `compile`/`map_byte_stream`/
//! `fold_byte_stream` surface, independent of any single module's internals.

use std::rc::Rc;

use dtfabric::definitions::{
    ByteOrder, Definition, DefinitionKind, ElementSequenceDefinition, IntegerDefinition, IntegerFormat, LengthMode,
    Member, StructureDefinition, TextEncoding, UuidDefinition,
};
use dtfabric::expr::Expr;
use dtfabric::map::DecodeError;
use dtfabric::value::Value;
use dtfabric::{compile, Context};

fn integer(name: &str, size: u8, byte_order: ByteOrder, format: IntegerFormat) -> Rc<Definition> {
    Rc::new(
        Definition::new(
            name,
            DefinitionKind::Integer(IntegerDefinition {
                size,
                byte_order,
                format,
                minimum_value: None,
                maximum_value: None,
            }),
        )
        .unwrap(),
    )
}

// S1 - little-endian 32-bit unsigned integer.
#[test]
fn s1_little_endian_unsigned_integer() {
    let definition = integer("uint32le", 4, ByteOrder::Little, IntegerFormat::Unsigned);
    let map = compile(&definition).unwrap();
    let mut context = Context::new();
    let value = map.map_byte_stream(&[0x12, 0x34, 0x56, 0x78], 0, &mut context).unwrap();
    assert_eq!(value, Value::Integer(0x78563412));
}

// S2 - UUID, little-endian field layout per RFC 4122 mixed-endian encoding.
#[test]
fn s2_uuid_little_endian() {
    let definition = Rc::new(
        Definition::new("guid", DefinitionKind::Uuid(UuidDefinition { byte_order: ByteOrder::Little })).unwrap(),
    );
    let map = compile(&definition).unwrap();
    let input = [
        0x01, 0x14, 0x02, 0x00, 0x00, 0x00, 0x00, 0x00, 0xC0, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x46,
    ];
    let mut context = Context::new();
    let value = map.map_byte_stream(&input, 0, &mut context).unwrap();
    let expected = uuid::Uuid::parse_str("00021401-0000-0000-c000-000000000046").unwrap();
    assert_eq!(value, Value::Uuid(expected));
}

// S3 - fixed-count sequence of signed 32-bit integers.
#[test]
fn s3_fixed_sequence_of_int32() {
    let element = integer("int32le", 4, ByteOrder::Little, IntegerFormat::Signed);
    let definition = Rc::new(
        Definition::new(
            "vector4",
            DefinitionKind::Sequence(ElementSequenceDefinition {
                element_type: element,
                length_mode: LengthMode::NumberOfElements { literal: Some(4), expression: None },
                encoding: None,
            }),
        )
        .unwrap(),
    );
    let map = compile(&definition).unwrap();
    let input = [1, 0, 0, 0, 2, 0, 0, 0, 3, 0, 0, 0, 4, 0, 0, 0];
    let mut context = Context::new();
    let value = map.map_byte_stream(&input, 0, &mut context).unwrap();
    assert_eq!(
        value,
        Value::Sequence(vec![Value::Integer(1), Value::Integer(2), Value::Integer(3), Value::Integer(4)])
    );
}

fn structure_with_sized_stream() -> Rc<Definition> {
    let size_type = integer("uint32le", 4, ByteOrder::Little, IntegerFormat::Unsigned);
    let byte_type = integer("uint8", 1, ByteOrder::Native, IntegerFormat::Unsigned);
    let stream = Rc::new(
        Definition::new(
            "data",
            DefinitionKind::Stream(ElementSequenceDefinition {
                element_type: byte_type,
                length_mode: LengthMode::DataSize { literal: None, expression: Some(Expr::parse("size - 4").unwrap()) },
                encoding: None,
            }),
        )
        .unwrap(),
    );
    Rc::new(
        Definition::new(
            "record",
            DefinitionKind::Structure(
                StructureDefinition::new(
                    Some(ByteOrder::Little),
                    vec![
                        Member { name: "size".into(), data_type: size_type, condition: None, values: None },
                        Member { name: "data".into(), data_type: stream, condition: None, values: None },
                    ],
                )
                .unwrap(),
            ),
        )
        .unwrap(),
    )
}

// S4 - structure with a sequence sized by an expression over an earlier member.
#[test]
fn s4_structure_sized_by_earlier_member() {
    let definition = structure_with_sized_stream();
    let map = compile(&definition).unwrap();

    let mut input = vec![0x04, 0x01, 0x00, 0x00];
    let payload: Vec<u8> = (0..=255u8).collect();
    input.extend_from_slice(&payload);

    let mut context = Context::new();
    let value = map.map_byte_stream(&input, 0, &mut context).unwrap();
    let structure = value.as_structure().unwrap();
    assert_eq!(structure.get("size"), Some(&Value::Integer(260)));
    assert_eq!(structure.get("data"), Some(&Value::Stream(payload)));
}

#[test]
fn s4_invalid_elements_data_size_is_a_mapping_error() {
    let definition = structure_with_sized_stream();
    let map = compile(&definition).unwrap();
    // size = 3: "size - 4" evaluates to a negative data size, which can
    // never be satisfied by any buffer.
    let input = [0x03, 0x00, 0x00, 0x00];
    let mut context = Context::new();
    let err = map.map_byte_stream(&input, 0, &mut context).unwrap_err();
    assert!(matches!(err, DecodeError::Mapping(_)));
}

// S5 - UTF-16LE string inside a structure, sized by an earlier member.
#[test]
fn s5_utf16_string_sized_by_earlier_member() {
    let size_type = integer("uint16le", 2, ByteOrder::Little, IntegerFormat::Unsigned);
    let byte_type = integer("uint8", 1, ByteOrder::Native, IntegerFormat::Unsigned);
    let text_type = Rc::new(
        Definition::new(
            "text",
            DefinitionKind::String(ElementSequenceDefinition {
                element_type: byte_type,
                length_mode: LengthMode::DataSize {
                    literal: None,
                    expression: Some(Expr::parse("size").unwrap()),
                },
                encoding: Some(TextEncoding::Utf16Le),
            }),
        )
        .unwrap(),
    );
    let definition = Rc::new(
        Definition::new(
            "record",
            DefinitionKind::Structure(
                StructureDefinition::new(
                    Some(ByteOrder::Little),
                    vec![
                        Member { name: "size".into(), data_type: size_type, condition: None, values: None },
                        Member { name: "text".into(), data_type: text_type, condition: None, values: None },
                    ],
                )
                .unwrap(),
            ),
        )
        .unwrap(),
    );
    let map = compile(&definition).unwrap();

    let mut input = vec![0x10, 0x00];
    for unit in "dtFabric".encode_utf16() {
        input.extend_from_slice(&unit.to_le_bytes());
    }

    let mut context = Context::new();
    let value = map.map_byte_stream(&input, 0, &mut context).unwrap();
    let structure = value.as_structure().unwrap();
    assert_eq!(structure.get("size"), Some(&Value::Integer(16)));
    assert_eq!(structure.get("text"), Some(&Value::Text("dtFabric".to_string())));
}

// S6 - a flag bit picks which of two mutually exclusive members is present.
#[test]
fn s6_conditional_member() {
    let flags_type = integer("uint16le", 2, ByteOrder::Little, IntegerFormat::Unsigned);
    let data_type = integer("uint32le", 4, ByteOrder::Little, IntegerFormat::Unsigned);
    let definition = Rc::new(
        Definition::new(
            "record",
            DefinitionKind::Structure(
                StructureDefinition::new(
                    Some(ByteOrder::Little),
                    vec![
                        Member { name: "flags".into(), data_type: flags_type.clone(), condition: None, values: None },
                        Member { name: "data2".into(), data_type: data_type.clone(), condition: None, values: None },
                        Member {
                            name: "conditional_data2".into(),
                            data_type: data_type.clone(),
                            condition: Some(Expr::parse("flags >= 0x8000").unwrap()),
                            values: None,
                        },
                        Member { name: "data3".into(), data_type, condition: None, values: None },
                    ],
                )
                .unwrap(),
            ),
        )
        .unwrap(),
    );
    let map = compile(&definition).unwrap();

    let with_flag = [
        0x01, 0x80, // flags = 0x8001
        0x11, 0x11, 0x11, 0x11, // data2
        0x22, 0x22, 0x22, 0x22, // conditional_data2
        0x33, 0x33, 0x33, 0x33, // data3
    ];
    let mut context = Context::new();
    let value = map.map_byte_stream(&with_flag, 0, &mut context).unwrap();
    let structure = value.as_structure().unwrap();
    assert_eq!(structure.get("conditional_data2"), Some(&Value::Integer(0x22222222)));
    assert_eq!(structure.get("data3"), Some(&Value::Integer(0x33333333)));

    let without_flag = [
        0x01, 0x00, // flags = 0x0001
        0x11, 0x11, 0x11, 0x11, // data2
        0x33, 0x33, 0x33, 0x33, // data3, immediately after data2
    ];
    let mut context = Context::new();
    let value = map.map_byte_stream(&without_flag, 0, &mut context).unwrap();
    let structure = value.as_structure().unwrap();
    assert_eq!(structure.get("conditional_data2"), None);
    assert_eq!(structure.get("data3"), Some(&Value::Integer(0x33333333)));
}

// S7 - incremental resumption: growing the buffer by 4 bytes at a time
// across three ByteStreamTooSmall events before finally succeeding.
#[test]
fn s7_incremental_resumption() {
    let element = integer("int32le", 4, ByteOrder::Little, IntegerFormat::Signed);
    let definition = Rc::new(
        Definition::new(
            "vector4",
            DefinitionKind::Sequence(ElementSequenceDefinition {
                element_type: element,
                length_mode: LengthMode::NumberOfElements { literal: Some(4), expression: None },
                encoding: None,
            }),
        )
        .unwrap(),
    );
    let map = compile(&definition).unwrap();
    let full = [1, 0, 0, 0, 2, 0, 0, 0, 3, 0, 0, 0, 4, 0, 0, 0];
    let mut context = Context::new();

    for prefix_len in [4, 8, 12] {
        let err = map.map_byte_stream(&full[..prefix_len], 0, &mut context).unwrap_err();
        assert!(matches!(err, DecodeError::TooSmall(_)));
    }

    let value = map.map_byte_stream(&full, 0, &mut context).unwrap();
    assert_eq!(
        value,
        Value::Sequence(vec![Value::Integer(1), Value::Integer(2), Value::Integer(3), Value::Integer(4)])
    );
    assert_eq!(context.byte_size, 16);
}
