#![allow(missing_docs)]

use std::ops::Bound;
use std::time::Duration;

use unique_seek::index::{
    IndexOrder, IndexQueryConstraints, NodeValueIndexCursor, PropertyIndexQuery,
    RelationshipValueIndexCursor,
};
use unique_seek::kernel::{Kernel, KernelOptions};
use unique_seek::schema::{IndexCapability, IndexDescriptor, IndexPrototype, SchemaDescriptor};
use unique_seek::types::{EdgeId, Error, LabelId, NodeId, PropId, Result, TypeId, Value};

const CITY: PropId = PropId(1);
const AGE: PropId = PropId(2);

fn people() -> Result<(Kernel, IndexDescriptor)> {
    let kernel = Kernel::new(KernelOptions::default().lock_timeout(Some(Duration::from_secs(5))));
    let index = kernel.create_index(IndexPrototype::range(
        "person_city_age",
        SchemaDescriptor::for_label(LabelId(1), &[CITY, AGE]),
    ))?;
    kernel.mark_index_online(index.id())?;

    let rows: [(&str, i64); 6] = [
        ("Oslo", 31),
        ("Oslo", 18),
        ("Oslo", 45),
        ("Lima", 27),
        ("Lima", 31),
        ("Kyiv", 31),
    ];
    let mut tx = kernel.begin_tx()?;
    for (city, age) in rows {
        let node = tx.create_node()?;
        tx.index_insert(&index, node, vec![Value::from(city), Value::Int(age)])?;
    }
    tx.commit()?;
    Ok((kernel, index))
}

fn drain(cursor: &mut NodeValueIndexCursor) -> Vec<NodeId> {
    let mut out = Vec::new();
    while cursor.next() {
        out.extend(cursor.reference());
    }
    out
}

#[test]
fn composite_prefix_with_range_suffix() -> Result<()> {
    let (kernel, index) = people()?;
    let tx = kernel.begin_tx()?;
    let session = tx.read().index_read_session(&index)?;
    let mut cursor = NodeValueIndexCursor::new();
    tx.read().node_index_seek(
        &session,
        &mut cursor,
        IndexQueryConstraints::ordered(IndexOrder::Ascending).with_values(),
        &[
            PropertyIndexQuery::exact(CITY, "Oslo"),
            PropertyIndexQuery::range(
                AGE,
                Bound::Included(Value::Int(20)),
                Bound::Unbounded,
            ),
        ],
    )?;
    let mut ages = Vec::new();
    while cursor.next() {
        let values = cursor.values().expect("values requested");
        assert_eq!(values[0], Value::from("Oslo"));
        ages.push(values[1].clone());
    }
    assert_eq!(ages, vec![Value::Int(31), Value::Int(45)]);
    Ok(())
}

#[test]
fn exists_suffix_matches_every_value() -> Result<()> {
    let (kernel, index) = people()?;
    let tx = kernel.begin_tx()?;
    let session = tx.read().index_read_session(&index)?;
    let mut cursor = NodeValueIndexCursor::new();
    tx.read().node_index_seek(
        &session,
        &mut cursor,
        IndexQueryConstraints::unconstrained(),
        &[
            PropertyIndexQuery::exact(CITY, "Lima"),
            PropertyIndexQuery::exists(AGE),
        ],
    )?;
    assert_eq!(drain(&mut cursor).len(), 2);
    assert_eq!(cursor.values(), None, "values were not requested");
    Ok(())
}

#[test]
fn range_before_last_component_is_rejected() -> Result<()> {
    let (kernel, index) = people()?;
    let tx = kernel.begin_tx()?;
    let session = tx.read().index_read_session(&index)?;
    let mut cursor = NodeValueIndexCursor::new();
    let err = tx
        .read()
        .node_index_seek(
            &session,
            &mut cursor,
            IndexQueryConstraints::unconstrained(),
            &[
                PropertyIndexQuery::exists(CITY),
                PropertyIndexQuery::exact(AGE, 31),
            ],
        )
        .unwrap_err();
    assert!(matches!(err, Error::Invalid(_)));
    Ok(())
}

#[test]
fn scan_orders_by_key_in_both_directions() -> Result<()> {
    let (kernel, index) = people()?;
    let tx = kernel.begin_tx()?;
    let session = tx.read().index_read_session(&index)?;
    let mut cursor = NodeValueIndexCursor::new();

    tx.read().node_index_scan(
        &session,
        &mut cursor,
        IndexQueryConstraints::ordered(IndexOrder::Ascending).with_values(),
    )?;
    let mut ascending = Vec::new();
    while cursor.next() {
        ascending.push(cursor.values().map(<[Value]>::to_vec));
    }
    assert_eq!(ascending.len(), 6);
    assert_eq!(
        ascending.first().cloned().flatten(),
        Some(vec![Value::from("Kyiv"), Value::Int(31)])
    );

    tx.read().node_index_scan(
        &session,
        &mut cursor,
        IndexQueryConstraints::ordered(IndexOrder::Descending).with_values(),
    )?;
    let mut descending = Vec::new();
    while cursor.next() {
        descending.push(cursor.values().map(<[Value]>::to_vec));
    }
    ascending.reverse();
    assert_eq!(descending, ascending);
    Ok(())
}

#[test]
fn session_keeps_reading_its_snapshot() -> Result<()> {
    let (kernel, index) = people()?;
    let tx = kernel.begin_tx()?;
    let session = tx.read().index_read_session(&index)?;

    let mut writer = kernel.begin_tx()?;
    let node = writer.create_node()?;
    writer.index_insert(&index, node, vec![Value::from("Rome"), Value::Int(60)])?;
    writer.commit()?;

    let mut cursor = NodeValueIndexCursor::new();
    let rome = [
        PropertyIndexQuery::exact(CITY, "Rome"),
        PropertyIndexQuery::exact(AGE, 60),
    ];
    tx.read()
        .node_index_seek(&session, &mut cursor, IndexQueryConstraints::unconstrained(), &rome)?;
    assert!(drain(&mut cursor).is_empty());

    let fresh = tx.read().index_read_session(&index)?;
    tx.read()
        .node_index_seek(&fresh, &mut cursor, IndexQueryConstraints::unconstrained(), &rome)?;
    assert_eq!(drain(&mut cursor), vec![node]);
    Ok(())
}

#[test]
fn node_seek_on_relationship_index_is_not_applicable() -> Result<()> {
    let kernel = Kernel::new(KernelOptions::default());
    let index = kernel.create_index(IndexPrototype::range(
        "knows_since",
        SchemaDescriptor::for_rel_type(TypeId(2), &[PropId(3)]),
    ))?;
    kernel.mark_index_online(index.id())?;

    let mut tx = kernel.begin_tx()?;
    tx.index_insert(&index, EdgeId(11), vec![Value::Int(2019)])?;
    tx.index_insert(&index, EdgeId(12), vec![Value::Int(2021)])?;
    tx.commit()?;

    let tx = kernel.begin_tx()?;
    let session = tx.read().index_read_session(&index)?;
    let mut nodes = NodeValueIndexCursor::new();
    let err = tx
        .read()
        .node_index_scan(&session, &mut nodes, IndexQueryConstraints::unconstrained())
        .unwrap_err();
    match err {
        Error::IndexNotApplicable(msg) => {
            assert!(msg.starts_with("node index scan can not be performed on index: "))
        }
        other => panic!("unexpected error {other:?}"),
    }

    let err = tx
        .read()
        .node_index_seek(
            &session,
            &mut nodes,
            IndexQueryConstraints::unconstrained(),
            &[PropertyIndexQuery::exists(PropId(3))],
        )
        .unwrap_err();
    match err {
        Error::IndexNotApplicable(msg) => {
            assert!(msg.starts_with("node index seek can not be performed on index: "))
        }
        other => panic!("unexpected error {other:?}"),
    }

    let mut rels = RelationshipValueIndexCursor::new();
    tx.read().relationship_index_seek(
        &session,
        &mut rels,
        IndexQueryConstraints::unconstrained(),
        &[PropertyIndexQuery::range(
            PropId(3),
            Bound::Excluded(Value::Int(2019)),
            Bound::Included(Value::Int(2030)),
        )],
    )?;
    assert!(rels.next());
    assert_eq!(rels.reference(), Some(EdgeId(12)));
    assert!(!rels.next());
    Ok(())
}

#[test]
fn value_capability_is_enforced() -> Result<()> {
    let kernel = Kernel::new(KernelOptions::default());
    let index = kernel.create_index(
        IndexPrototype::range("opaque", SchemaDescriptor::for_label(LabelId(4), &[PropId(1)]))
            .with_capability(IndexCapability::NO_CAPABILITY),
    )?;
    kernel.mark_index_online(index.id())?;
    let tx = kernel.begin_tx()?;
    let session = tx.read().index_read_session(&index)?;
    let mut cursor = NodeValueIndexCursor::new();
    let err = tx
        .read()
        .node_index_scan(
            &session,
            &mut cursor,
            IndexQueryConstraints::unconstrained().with_values(),
        )
        .unwrap_err();
    assert!(matches!(err, Error::Unsupported(_)));
    Ok(())
}
