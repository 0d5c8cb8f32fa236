//! Unit tests for values, the BSATN codec, the schema-driven encoder, and
//! schema parsing.

use bytes::Bytes;
use serde_json::json;

use crate::bsatn::{decode_value, Decoder};
use crate::{
    encode_reducer_args, encode_to_bytes, AlgebraicType, Column, DecodeError, EncodeError, Row,
    Schema, SchemaError, Value, Variant, I256, U256,
};

fn roundtrip(value: Value, ty: &AlgebraicType) {
    let bytes = encode_to_bytes(&value, ty).expect("encode");
    let mut dec = Decoder::new(bytes);
    let decoded = decode_value(&mut dec, ty).expect("decode");
    assert_eq!(decoded, value);
    assert!(dec.is_empty(), "decoder left unread bytes");
}

// ============================================================================
// Primitive round trips
// ============================================================================

#[test]
fn bool_roundtrip() {
    roundtrip(Value::Bool(true), &AlgebraicType::Bool);
    roundtrip(Value::Bool(false), &AlgebraicType::Bool);
}

#[test]
fn integer_roundtrips_at_every_width() {
    roundtrip(Value::I8(-128), &AlgebraicType::I8);
    roundtrip(Value::U8(255), &AlgebraicType::U8);
    roundtrip(Value::I16(-32768), &AlgebraicType::I16);
    roundtrip(Value::U16(65535), &AlgebraicType::U16);
    roundtrip(Value::I32(i32::MIN), &AlgebraicType::I32);
    roundtrip(Value::U32(u32::MAX), &AlgebraicType::U32);
    roundtrip(Value::I64(i64::MIN), &AlgebraicType::I64);
    roundtrip(Value::U64(u64::MAX), &AlgebraicType::U64);
    roundtrip(Value::I128(i128::MIN), &AlgebraicType::I128);
    roundtrip(Value::U128(u128::MAX), &AlgebraicType::U128);
}

#[test]
fn wide_integer_roundtrips() {
    let mut raw = [0u8; 32];
    for (i, b) in raw.iter_mut().enumerate() {
        *b = i as u8;
    }
    roundtrip(Value::I256(I256::from_le_bytes(raw)), &AlgebraicType::I256);
    roundtrip(Value::U256(U256::from_le_bytes(raw)), &AlgebraicType::U256);
}

#[test]
fn i256_sign_extension_from_i128() {
    let wide = I256::from(-1i128);
    assert_eq!(wide.to_le_bytes(), [0xff; 32]);
    assert!(wide.is_negative());
    assert_eq!(wide.to_i128(), Some(-1));

    let positive = I256::from(42i128);
    assert!(!positive.is_negative());
    assert_eq!(positive.to_i128(), Some(42));
}

#[test]
fn u256_narrows_only_when_high_half_is_zero() {
    assert_eq!(U256::from(7u128).to_u128(), Some(7));
    let mut raw = [0u8; 32];
    raw[31] = 1;
    assert_eq!(U256::from_le_bytes(raw).to_u128(), None);
}

#[test]
fn float_roundtrips() {
    roundtrip(Value::F32(1.5), &AlgebraicType::F32);
    roundtrip(Value::F64(-2.25), &AlgebraicType::F64);
}

#[test]
fn float_zero_sign_is_preserved() {
    let bytes = encode_to_bytes(&Value::F64(-0.0), &AlgebraicType::F64).expect("encode");
    let mut dec = Decoder::new(bytes);
    let Value::F64(decoded) = decode_value(&mut dec, &AlgebraicType::F64).expect("decode") else {
        panic!("expected f64");
    };
    assert_eq!(decoded.to_bits(), (-0.0f64).to_bits());
}

#[test]
fn integers_are_little_endian() {
    let bytes = encode_to_bytes(&Value::U32(0x0403_0201), &AlgebraicType::U32).expect("encode");
    assert_eq!(&bytes[..], &[0x01, 0x02, 0x03, 0x04]);
}

// ============================================================================
// Strings and bytes
// ============================================================================

#[test]
fn string_roundtrip() {
    roundtrip(Value::String(String::new()), &AlgebraicType::String);
    roundtrip(
        Value::String("héllo wörld".to_string()),
        &AlgebraicType::String,
    );
}

#[test]
fn string_wire_form_is_length_prefixed() {
    let bytes = encode_to_bytes(&Value::String("tok".into()), &AlgebraicType::String)
        .expect("encode");
    assert_eq!(&bytes[..], &[0x03, 0x00, 0x00, 0x00, b't', b'o', b'k']);
}

#[test]
fn invalid_utf8_reports_string_length() {
    let mut dec = Decoder::new(Bytes::from_static(&[2, 0, 0, 0, 0xff, 0xfe]));
    let err = decode_value(&mut dec, &AlgebraicType::String).unwrap_err();
    assert_eq!(err, DecodeError::InvalidUtf8(2));
}

#[test]
fn bytes_roundtrip() {
    roundtrip(
        Value::Bytes(Bytes::from_static(&[0, 1, 2, 0xff])),
        &AlgebraicType::Bytes,
    );
}

#[test]
fn truncated_input_is_unexpected_eof() {
    // Length prefix promises 10 bytes, only 2 follow.
    let mut dec = Decoder::new(Bytes::from_static(&[10, 0, 0, 0, b'a', b'b']));
    let err = decode_value(&mut dec, &AlgebraicType::String).unwrap_err();
    assert!(matches!(err, DecodeError::UnexpectedEof { .. }));
}

// ============================================================================
// Compound types
// ============================================================================

#[test]
fn array_roundtrip() {
    let ty = AlgebraicType::Array(Box::new(AlgebraicType::U16));
    roundtrip(Value::Array(vec![]), &ty);
    roundtrip(
        Value::Array(vec![Value::U16(1), Value::U16(2), Value::U16(3)]),
        &ty,
    );
}

#[test]
fn array_consumes_exactly_count_elements() {
    let ty = AlgebraicType::Array(Box::new(AlgebraicType::U8));
    // count=2, elements [7, 8], then two trailing bytes that are not part
    // of the array.
    let mut dec = Decoder::new(Bytes::from_static(&[2, 0, 0, 0, 7, 8, 0xAA, 0xBB]));
    let decoded = decode_value(&mut dec, &ty).expect("decode");
    assert_eq!(decoded, Value::Array(vec![Value::U8(7), Value::U8(8)]));
    assert_eq!(dec.remaining(), 2);
}

#[test]
fn option_some_is_tag_zero() {
    let ty = AlgebraicType::Option(Box::new(AlgebraicType::U8));
    let bytes = encode_to_bytes(&Value::Option(Some(Box::new(Value::U8(5)))), &ty)
        .expect("encode");
    assert_eq!(&bytes[..], &[0x00, 0x05]);
}

#[test]
fn option_none_is_single_byte_one() {
    let ty = AlgebraicType::Option(Box::new(AlgebraicType::U64));
    let bytes = encode_to_bytes(&Value::Option(None), &ty).expect("encode");
    assert_eq!(&bytes[..], &[0x01]);
}

#[test]
fn option_roundtrip() {
    let ty = AlgebraicType::Option(Box::new(AlgebraicType::String));
    roundtrip(Value::Option(None), &ty);
    roundtrip(
        Value::Option(Some(Box::new(Value::String("x".into())))),
        &ty,
    );
}

#[test]
fn invalid_option_tag_is_rejected() {
    let ty = AlgebraicType::Option(Box::new(AlgebraicType::U8));
    let mut dec = Decoder::new(Bytes::from_static(&[2, 0]));
    let err = decode_value(&mut dec, &ty).unwrap_err();
    assert_eq!(err, DecodeError::InvalidOptionTag(2));
}

#[test]
fn product_is_unframed_field_concatenation() {
    let ty = AlgebraicType::Product(vec![
        Column::new("a", AlgebraicType::U8),
        Column::new("b", AlgebraicType::U16),
    ]);
    let row = Row::new().with("a", Value::U8(1)).with("b", Value::U16(2));
    let bytes = encode_to_bytes(&Value::Product(row), &ty).expect("encode");
    assert_eq!(&bytes[..], &[0x01, 0x02, 0x00]);
}

#[test]
fn product_roundtrip_preserves_field_order() {
    let ty = AlgebraicType::Product(vec![
        Column::new("id", AlgebraicType::U64),
        Column::new("name", AlgebraicType::String),
    ]);
    let row = Row::new()
        .with("id", Value::U64(9))
        .with("name", Value::String("z".into()));
    let bytes = encode_to_bytes(&Value::Product(row), &ty).expect("encode");
    let mut dec = Decoder::new(bytes);
    let Value::Product(decoded) = decode_value(&mut dec, &ty).expect("decode") else {
        panic!("expected product");
    };
    let names: Vec<_> = decoded.iter().map(|(n, _)| n.to_string()).collect();
    assert_eq!(names, ["id", "name"]);
}

#[test]
fn sum_roundtrip_and_unknown_tag() {
    let ty = AlgebraicType::Sum(vec![
        Variant::unit("off"),
        Variant::new("level", AlgebraicType::U8),
    ]);
    roundtrip(
        Value::Sum {
            tag: 1,
            value: Box::new(Value::U8(3)),
        },
        &ty,
    );

    let mut dec = Decoder::new(Bytes::from_static(&[9]));
    let err = decode_value(&mut dec, &ty).unwrap_err();
    assert!(matches!(err, DecodeError::UnknownVariantTag { tag: 9, .. }));
}

#[test]
fn payloadless_variant_encodes_to_tag_only() {
    let ty = AlgebraicType::Sum(vec![
        Variant::unit("off"),
        Variant::new("level", AlgebraicType::U8),
    ]);
    let bytes = encode_to_bytes(
        &Value::Sum {
            tag: 0,
            value: Box::new(Value::Product(Row::new())),
        },
        &ty,
    )
    .expect("encode");
    assert_eq!(&bytes[..], &[0x00]);
}

// ============================================================================
// Schema-driven encoder
// ============================================================================

#[test]
fn encoder_adapts_integer_widths() {
    // A u8-shaped host value encodes fine against a u64 column.
    let bytes = encode_to_bytes(&Value::U8(7), &AlgebraicType::U64).expect("encode");
    assert_eq!(&bytes[..], &[7, 0, 0, 0, 0, 0, 0, 0]);

    // And a value that does not fit the target width is a mismatch.
    let err = encode_to_bytes(&Value::U16(300), &AlgebraicType::U8).unwrap_err();
    assert!(matches!(err, EncodeError::TypeMismatch { .. }));
}

#[test]
fn encoder_rejects_negative_for_unsigned() {
    let err = encode_to_bytes(&Value::I32(-1), &AlgebraicType::U32).unwrap_err();
    assert!(matches!(err, EncodeError::TypeMismatch { .. }));
}

#[test]
fn encoder_accepts_integers_for_floats() {
    let bytes = encode_to_bytes(&Value::I32(3), &AlgebraicType::F64).expect("encode");
    assert_eq!(&bytes[..], &3.0f64.to_le_bytes());
}

#[test]
fn encoder_rejects_floats_for_integers() {
    let err = encode_to_bytes(&Value::F64(3.0), &AlgebraicType::U32).unwrap_err();
    assert!(matches!(err, EncodeError::TypeMismatch { .. }));
}

#[test]
fn encoder_widens_small_int_to_i256() {
    let bytes = encode_to_bytes(&Value::I8(-1), &AlgebraicType::I256).expect("encode");
    assert_eq!(&bytes[..], &[0xff; 32]);
}

#[test]
fn encoder_auto_wraps_bare_option_value() {
    let ty = AlgebraicType::Option(Box::new(AlgebraicType::U8));
    let bytes = encode_to_bytes(&Value::U8(9), &ty).expect("encode");
    assert_eq!(&bytes[..], &[0x00, 0x09]);
}

#[test]
fn encoder_reports_missing_product_field() {
    let ty = AlgebraicType::Product(vec![Column::new("age", AlgebraicType::U32)]);
    let err = encode_to_bytes(&Value::Product(Row::new()), &ty).unwrap_err();
    assert_eq!(err, EncodeError::MissingField("age".to_string()));
}

#[test]
fn reducer_args_encode_as_anonymous_product() {
    let params = vec![
        Column::new("name", AlgebraicType::String),
        Column::new("age", AlgebraicType::U32),
    ];
    let args = Row::new()
        .with("age", Value::U32(30))
        .with("name", Value::String("Ann".into()));
    let bytes = encode_reducer_args(&args, &params).expect("encode");
    assert_eq!(
        &bytes[..],
        &[3, 0, 0, 0, b'A', b'n', b'n', 30, 0, 0, 0]
    );
}

#[test]
fn reducer_args_missing_param_fails() {
    let params = vec![Column::new("name", AlgebraicType::String)];
    let err = encode_reducer_args(&Row::new(), &params).unwrap_err();
    assert_eq!(err, EncodeError::MissingField("name".to_string()));
}

// ============================================================================
// Schema parsing
// ============================================================================

fn person_schema_doc() -> serde_json::Value {
    json!({
        "typespace": { "types": [
            { "Product": { "elements": [
                { "name": { "some": "id" }, "algebraic_type": { "U64": [] } },
                { "name": "name", "algebraic_type": "String" },
                { "name": { "some": "age" }, "algebraic_type": { "U32": [] } }
            ]}}
        ]},
        "tables": [
            { "name": "person", "product_type_ref": 0, "primary_key": [0] }
        ],
        "reducers": [
            { "name": "add_person", "params": { "elements": [
                { "name": "name", "algebraic_type": { "String": [] } },
                { "name": "age", "algebraic_type": { "U32": [] } }
            ]}}
        ]
    })
}

#[test]
fn parses_tables_and_reducers() {
    let schema = Schema::parse(&person_schema_doc()).expect("parse");

    let columns = schema.columns_for("person").expect("columns");
    assert_eq!(columns.len(), 3);
    assert_eq!(columns[0].name, "id");
    assert_eq!(columns[0].ty, AlgebraicType::U64);
    assert_eq!(columns[1].ty, AlgebraicType::String);
    assert_eq!(schema.primary_key_for("person").expect("pk"), &[0]);

    let reducer = schema.reducer("add_person").expect("reducer");
    assert_eq!(reducer.params.len(), 2);
    assert_eq!(reducer.params[1].name, "age");
}

#[test]
fn unknown_table_lookup_fails() {
    let schema = Schema::parse(&person_schema_doc()).expect("parse");
    assert_eq!(
        schema.columns_for("nope").unwrap_err(),
        SchemaError::UnknownTable("nope".to_string())
    );
}

#[test]
fn refs_are_inlined_into_table_columns() {
    let doc = json!({
        "typespace": { "types": [
            { "Product": { "elements": [
                { "name": "x", "algebraic_type": { "F32": [] } }
            ]}},
            { "Product": { "elements": [
                { "name": "id", "algebraic_type": { "U32": [] } },
                { "name": "pos", "algebraic_type": { "Ref": 0 } }
            ]}}
        ]},
        "tables": [ { "name": "entity", "product_type_ref": 1, "primary_key": [0] } ],
        "reducers": []
    });
    let schema = Schema::parse(&doc).expect("parse");
    let columns = schema.columns_for("entity").expect("columns");
    assert!(!columns.iter().any(|c| c.ty.contains_ref()));
    assert_eq!(
        columns[1].ty,
        AlgebraicType::Product(vec![Column::new("x", AlgebraicType::F32)])
    );
}

#[test]
fn some_none_sum_is_recognized_as_option() {
    let doc = json!({
        "typespace": { "types": [
            { "Product": { "elements": [
                { "name": "id", "algebraic_type": { "U64": [] } },
                { "name": "nick", "algebraic_type": { "Sum": { "variants": [
                    { "name": "some", "algebraic_type": { "String": [] } },
                    { "name": "none", "algebraic_type": { "Product": { "elements": [] } } }
                ]}}}
            ]}}
        ]},
        "tables": [ { "name": "player", "product_type_ref": 0, "primary_key": [0] } ],
        "reducers": []
    });
    let schema = Schema::parse(&doc).expect("parse");
    let columns = schema.columns_for("player").expect("columns");
    assert_eq!(
        columns[1].ty,
        AlgebraicType::Option(Box::new(AlgebraicType::String))
    );
}

#[test]
fn other_sums_stay_generic() {
    let doc = json!({
        "typespace": { "types": [
            { "Product": { "elements": [
                { "name": "id", "algebraic_type": { "U64": [] } },
                { "name": "state", "algebraic_type": { "Sum": { "variants": [
                    { "name": "idle", "algebraic_type": { "Product": { "elements": [] } } },
                    { "name": "busy", "algebraic_type": { "U32": [] } }
                ]}}}
            ]}}
        ]},
        "tables": [ { "name": "worker", "product_type_ref": 0, "primary_key": [0] } ],
        "reducers": []
    });
    let schema = Schema::parse(&doc).expect("parse");
    let columns = schema.columns_for("worker").expect("columns");
    assert!(matches!(columns[1].ty, AlgebraicType::Sum(ref v) if v.len() == 2));
}

#[test]
fn ref_cycle_terminates_with_unresolved_ref() {
    let doc = json!({
        "typespace": { "types": [
            { "Product": { "elements": [
                { "name": "next", "algebraic_type": { "Ref": 0 } }
            ]}}
        ]},
        "tables": [ { "name": "node", "product_type_ref": 0, "primary_key": [0] } ],
        "reducers": []
    });
    let err = Schema::parse(&doc).unwrap_err();
    assert_eq!(err, SchemaError::UnresolvedRef(0));
}

#[test]
fn ref_out_of_range_is_rejected() {
    let doc = json!({
        "typespace": { "types": [] },
        "tables": [ { "name": "t", "product_type_ref": 3, "primary_key": [] } ],
        "reducers": []
    });
    let err = Schema::parse(&doc).unwrap_err();
    assert_eq!(err, SchemaError::RefOutOfRange { index: 3, len: 0 });
}

#[test]
fn unnamed_table_column_is_rejected() {
    let doc = json!({
        "typespace": { "types": [
            { "Product": { "elements": [
                { "algebraic_type": { "U64": [] } }
            ]}}
        ]},
        "tables": [ { "name": "t", "product_type_ref": 0, "primary_key": [] } ],
        "reducers": []
    });
    let err = Schema::parse(&doc).unwrap_err();
    assert!(matches!(err, SchemaError::UnnamedColumn { index: 0, .. }));
}

#[test]
fn missing_typespace_is_rejected() {
    let err = Schema::parse(&json!({ "tables": [], "reducers": [] })).unwrap_err();
    assert_eq!(err, SchemaError::MissingKey("typespace.types"));
}

// ============================================================================
// Row
// ============================================================================

#[test]
fn row_insert_replaces_existing_field() {
    let mut row = Row::new();
    row.insert("a", Value::U8(1));
    row.insert("a", Value::U8(2));
    assert_eq!(row.len(), 1);
    assert_eq!(row.get("a"), Some(&Value::U8(2)));
}

#[test]
fn row_tracks_decode_error_sentinels() {
    let clean = Row::new().with("a", Value::U8(1));
    assert!(!clean.has_decode_errors());
    let tainted = Row::new().with("a", Value::DecodeError("bad bool".into()));
    assert!(tainted.has_decode_errors());
}
