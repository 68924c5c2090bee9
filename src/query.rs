//! The query executor.
//!
//! Evaluates a filter tree into a sorted, duplicate-free set of
//! record ids, then lets the dispatcher turn ids into records and
//! apply ordering, projection, and limit. Comparisons are typed by
//! the collection schema; boolean combinators are linear merges over
//! pre-sorted id sets, which keeps results in lexical id order
//! without hashing. Evaluation never mutates storage.

use std::cmp::Ordering;

use serde_json::Value;

use crate::action::{BoolOp, CmpOp, Filter};
use crate::block;
use crate::config::Config;
use crate::errors::{CeresError, Result};
use crate::os;
use crate::record::{self, Record};
use crate::schema::{FieldType, SchemaRegistry};

// A literal or record value coerced to a field's declared type.
#[derive(Debug, Clone, PartialEq)]
enum Typed {
    Int(i64),
    Float(f64),
    Str(String),
    Bool(bool),
}

// Coerces a filter literal by the declared type. Failure here is a
// malformed query, not a storage condition.
fn coerce_literal(ty: FieldType, literal: &str) -> Result<Typed> {
    match ty {
        FieldType::Int => literal
            .parse::<i64>()
            .map(Typed::Int)
            .map_err(|_| CeresError::Parse(format!("'{literal}' is not an INT literal"))),
        FieldType::Float => match literal.parse::<f64>() {
            Ok(f) if f.is_finite() => Ok(Typed::Float(f)),
            _ => Err(CeresError::Parse(format!(
                "'{literal}' is not a FLOAT literal"
            ))),
        },
        FieldType::Bool => match literal {
            "true" => Ok(Typed::Bool(true)),
            "false" => Ok(Typed::Bool(false)),
            _ => Err(CeresError::Parse(format!(
                "'{literal}' is not a BOOL literal"
            ))),
        },
        FieldType::String => Ok(Typed::Str(literal.to_string())),
    }
}

// Promotes a stored value to the declared type. A value that does
// not promote makes the predicate false for its record.
fn promote(ty: FieldType, value: &Value) -> Option<Typed> {
    match ty {
        FieldType::Int => value.as_i64().map(Typed::Int),
        FieldType::Float => value.as_f64().map(Typed::Float),
        FieldType::Bool => value.as_bool().map(Typed::Bool),
        FieldType::String => value.as_str().map(|s| Typed::Str(s.to_string())),
    }
}

fn compare_typed(a: &Typed, b: &Typed) -> Ordering {
    match (a, b) {
        (Typed::Int(x), Typed::Int(y)) => x.cmp(y),
        (Typed::Float(x), Typed::Float(y)) => x.total_cmp(y),
        (Typed::Str(x), Typed::Str(y)) => x.cmp(y),
        (Typed::Bool(x), Typed::Bool(y)) => x.cmp(y),
        // Both sides come from the same declared type.
        _ => Ordering::Equal,
    }
}

fn op_matches(op: CmpOp, ord: Ordering) -> bool {
    match op {
        CmpOp::Eq => ord == Ordering::Equal,
        CmpOp::Ne => ord != Ordering::Equal,
        CmpOp::Lt => ord == Ordering::Less,
        CmpOp::Le => ord != Ordering::Greater,
        CmpOp::Gt => ord == Ordering::Greater,
        CmpOp::Ge => ord != Ordering::Less,
    }
}

// Ids of every occupied slot in the collection, lexically sorted.
// This is the scan universe: GET without a filter and the complement
// side of NOT both use it.
pub(crate) fn occupied_ids(
    config: &Config,
    database: &str,
    collection: &str,
) -> Result<Vec<String>> {
    let dir = config.collection_dir(database, collection);
    let mut ids = Vec::new();
    for prefix in os::visible_entries(&dir)? {
        let path = config.block_path(database, collection, &prefix);
        for slot in block::occupied_slots(&path, config.block_capacity)? {
            ids.push(format!("{prefix}.{slot}"));
        }
    }
    ids.sort();
    Ok(ids)
}

// One comparison leaf: scan every block file once, compare each
// present record under the declared type.
fn scan_comparison(
    config: &Config,
    registry: &SchemaRegistry,
    database: &str,
    collection: &str,
    op: CmpOp,
    field: &str,
    literal: &str,
) -> Result<Vec<String>> {
    let ty = registry.lookup(config, database, collection, field)?;
    let literal = coerce_literal(ty, literal)?;

    let dir = config.collection_dir(database, collection);
    let full = [(0, config.block_capacity - 1)];
    let mut ids = Vec::new();
    for prefix in os::visible_entries(&dir)? {
        let path = config.block_path(database, collection, &prefix);
        for rec in block::read_slots(&path, &full, config.block_capacity)? {
            let Some(value) = rec.get(field) else { continue };
            let Some(value) = promote(ty, value) else { continue };
            if op_matches(op, compare_typed(&value, &literal)) {
                if let Some(id) = record::id_of(&rec) {
                    ids.push(id.to_string());
                }
            }
        }
    }
    ids.sort();
    ids.dedup();
    Ok(ids)
}

/// ProcessFilter evaluates a filter tree to the sorted id set of the
/// matching records.
pub(crate) fn process_filter(
    config: &Config,
    registry: &SchemaRegistry,
    database: &str,
    collection: &str,
    filter: &Filter,
) -> Result<Vec<String>> {
    match filter {
        Filter::Cmp { op, field, literal } => {
            scan_comparison(config, registry, database, collection, *op, field, literal)
        }
        Filter::Bool { op, left, right } => {
            let left = process_filter(config, registry, database, collection, left)?;
            let right = process_filter(config, registry, database, collection, right)?;
            Ok(match op {
                BoolOp::And => do_and(&left, &right),
                BoolOp::Or => do_or(&left, &right),
                BoolOp::Xor => do_xor(&left, &right),
            })
        }
        Filter::Not { inner } => {
            let universe = occupied_ids(config, database, collection)?;
            let inner = process_filter(config, registry, database, collection, inner)?;
            Ok(do_not(&universe, &inner))
        }
    }
}

// The id-set combinators below take sorted, deduplicated inputs and
// keep that shape, one linear pass each.

pub(crate) fn do_and(a: &[String], b: &[String]) -> Vec<String> {
    let (mut i, mut j) = (0, 0);
    let mut out = Vec::new();
    while i < a.len() && j < b.len() {
        match a[i].cmp(&b[j]) {
            Ordering::Less => i += 1,
            Ordering::Greater => j += 1,
            Ordering::Equal => {
                out.push(a[i].clone());
                i += 1;
                j += 1;
            }
        }
    }
    out
}

pub(crate) fn do_or(a: &[String], b: &[String]) -> Vec<String> {
    let (mut i, mut j) = (0, 0);
    let mut out = Vec::new();
    while i < a.len() && j < b.len() {
        match a[i].cmp(&b[j]) {
            Ordering::Less => {
                out.push(a[i].clone());
                i += 1;
            }
            Ordering::Greater => {
                out.push(b[j].clone());
                j += 1;
            }
            Ordering::Equal => {
                out.push(a[i].clone());
                i += 1;
                j += 1;
            }
        }
    }
    out.extend_from_slice(&a[i..]);
    out.extend_from_slice(&b[j..]);
    out
}

// Elements of `a` absent from `b`.
pub(crate) fn do_not(a: &[String], b: &[String]) -> Vec<String> {
    let (mut i, mut j) = (0, 0);
    let mut out = Vec::new();
    while i < a.len() && j < b.len() {
        match a[i].cmp(&b[j]) {
            Ordering::Less => {
                out.push(a[i].clone());
                i += 1;
            }
            Ordering::Greater => j += 1,
            Ordering::Equal => {
                i += 1;
                j += 1;
            }
        }
    }
    out.extend_from_slice(&a[i..]);
    out
}

pub(crate) fn do_xor(a: &[String], b: &[String]) -> Vec<String> {
    let (mut i, mut j) = (0, 0);
    let mut out = Vec::new();
    while i < a.len() && j < b.len() {
        match a[i].cmp(&b[j]) {
            Ordering::Less => {
                out.push(a[i].clone());
                i += 1;
            }
            Ordering::Greater => {
                out.push(b[j].clone());
                j += 1;
            }
            Ordering::Equal => {
                i += 1;
                j += 1;
            }
        }
    }
    out.extend_from_slice(&a[i..]);
    out.extend_from_slice(&b[j..]);
    out
}

// Generic value order used for sorting result records: null, then
// bools, then numbers, then strings. Missing fields sort as null.
fn value_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            let x = x.as_f64().unwrap_or(0.0);
            let y = y.as_f64().unwrap_or(0.0);
            x.total_cmp(&y)
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        _ => value_rank(a).cmp(&value_rank(b)),
    }
}

fn field_of<'r>(record: &'r Record, field: &str) -> &'r Value {
    record.get(field).unwrap_or(&Value::Null)
}

// doOrderASC stable-sorts records by a field, smallest first.
pub(crate) fn do_order_asc(mut records: Vec<Record>, field: &str) -> Vec<Record> {
    records.sort_by(|a, b| compare_values(field_of(a, field), field_of(b, field)));
    records
}

// doOrderDSC stable-sorts records by a field, largest first. Equal
// keys keep their relative order, same as ascending.
pub(crate) fn do_order_dsc(mut records: Vec<Record>, field: &str) -> Vec<Record> {
    records.sort_by(|a, b| compare_values(field_of(b, field), field_of(a, field)));
    records
}

// Keeps only the named fields of each record. An empty field list
// keeps everything.
pub(crate) fn project(records: Vec<Record>, fields: &[String]) -> Vec<Record> {
    if fields.is_empty() {
        return records;
    }
    records
        .into_iter()
        .map(|record| {
            let mut out = Record::new();
            for field in fields {
                if let Some(value) = record.get(field) {
                    out.insert(field.clone(), value.clone());
                }
            }
            out
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::fs;

    use serde_json::json;
    use tempfile::TempDir;

    use crate::collection;
    use crate::freelist::FreeList;
    use crate::schema::CollectionSchema;

    fn ids(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_do_and() {
        let a = ids(&["bar", "foo", "hello", "world"]);
        let b = ids(&["Hello", "bar", "baz", "world"]);
        assert_eq!(do_and(&a, &b), ids(&["bar", "world"]));
    }

    #[test]
    fn test_do_or() {
        let a = ids(&["bar", "foo", "hello", "world"]);
        let b = ids(&["Hello", "bar", "baz", "world"]);
        assert_eq!(
            do_or(&a, &b),
            ids(&["Hello", "bar", "baz", "foo", "hello", "world"])
        );
    }

    #[test]
    fn test_do_not() {
        let a = ids(&["bar", "foo", "hello", "world"]);
        let b = ids(&["bar", "baz", "hello"]);
        assert_eq!(do_not(&a, &b), ids(&["foo", "world"]));
    }

    #[test]
    fn test_do_xor() {
        let a = ids(&["bar", "foo", "hello", "world"]);
        let b = ids(&["bar", "baz", "hello"]);
        assert_eq!(do_xor(&a, &b), ids(&["baz", "foo", "world"]));
    }

    #[test]
    fn test_set_op_laws() {
        let a = ids(&["a", "c", "e"]);
        let b = ids(&["b", "c", "d"]);
        let c = ids(&["c", "e", "f"]);

        assert_eq!(do_and(&a, &b), do_and(&b, &a));
        assert_eq!(do_or(&a, &b), do_or(&b, &a));
        assert_eq!(
            do_and(&do_and(&a, &b), &c),
            do_and(&a, &do_and(&b, &c))
        );
        assert_eq!(do_or(&do_or(&a, &b), &c), do_or(&a, &do_or(&b, &c)));

        // A AND (B OR C) = (A AND B) OR (A AND C)
        assert_eq!(
            do_and(&a, &do_or(&b, &c)),
            do_or(&do_and(&a, &b), &do_and(&a, &c))
        );

        // NOT(NOT S) = S against a fixed universe.
        let universe = ids(&["a", "b", "c", "d", "e", "f"]);
        assert_eq!(do_not(&universe, &do_not(&universe, &a)), a);
    }

    #[test]
    fn test_do_order_asc_dsc() {
        let input: Vec<Record> = ["c", "b", "a"]
            .iter()
            .map(|v| serde_json::from_value(json!({"foo": v})).unwrap())
            .collect();

        let asc = do_order_asc(input.clone(), "foo");
        let got: Vec<&str> = asc.iter().map(|r| r["foo"].as_str().unwrap()).collect();
        assert_eq!(got, vec!["a", "b", "c"]);

        let dsc = do_order_dsc(asc, "foo");
        let got: Vec<&str> = dsc.iter().map(|r| r["foo"].as_str().unwrap()).collect();
        assert_eq!(got, vec!["c", "b", "a"]);
    }

    #[test]
    fn test_order_is_stable_on_equal_keys() {
        let input: Vec<Record> = [("x", 1), ("y", 1), ("z", 0)]
            .iter()
            .map(|(tag, n)| {
                serde_json::from_value(json!({"tag": tag, "n": n})).unwrap()
            })
            .collect();

        let asc = do_order_asc(input, "n");
        let tags: Vec<&str> = asc.iter().map(|r| r["tag"].as_str().unwrap()).collect();
        assert_eq!(tags, vec!["z", "x", "y"]);

        // Reversing does not perturb the x/y run.
        let dsc = do_order_dsc(asc, "n");
        let tags: Vec<&str> = dsc.iter().map(|r| r["tag"].as_str().unwrap()).collect();
        assert_eq!(tags, vec!["x", "y", "z"]);
    }

    #[test]
    fn test_project() {
        let records: Vec<Record> = vec![
            serde_json::from_value(json!({"item": "bolt", "price": 5, ".id": "a.0"})).unwrap(),
        ];
        let out = project(records.clone(), &ids(&["price"]));
        assert_eq!(out[0], serde_json::from_value(json!({"price": 5})).unwrap());

        // Empty field list keeps the whole record.
        let out = project(records, &[]);
        assert_eq!(out[0].len(), 3);
    }

    #[test]
    fn test_coerce_literal_errors() {
        assert!(matches!(
            coerce_literal(FieldType::Int, "4.5"),
            Err(CeresError::Parse(_))
        ));
        assert!(matches!(
            coerce_literal(FieldType::Bool, "yes"),
            Err(CeresError::Parse(_))
        ));
        assert!(matches!(
            coerce_literal(FieldType::Float, "inf"),
            Err(CeresError::Parse(_))
        ));
        assert_eq!(
            coerce_literal(FieldType::Float, "3.0").unwrap(),
            Typed::Float(3.0)
        );
    }

    // Storage-backed scan tests.

    const CAPACITY: usize = 8;

    struct Fixture {
        _dir: TempDir,
        config: Config,
        freelist: FreeList,
        registry: SchemaRegistry,
    }

    fn fixture(ty: FieldType, values: Vec<Value>) -> (Fixture, Vec<String>) {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::new(dir.path());
        config.block_capacity = CAPACITY;
        fs::create_dir_all(config.collection_dir("filter", "test")).unwrap();

        let mut registry = SchemaRegistry::default();
        let schema: CollectionSchema = [("foo".to_string(), ty)].into_iter().collect();
        registry.define("filter", "test", schema);

        let records: Vec<Record> = values
            .into_iter()
            .map(|v| {
                let mut r = Record::new();
                r.insert("foo".to_string(), v);
                r
            })
            .collect();

        let mut fx = Fixture {
            _dir: dir,
            config,
            freelist: FreeList::default(),
            registry,
        };
        let written = collection::write(
            &fx.config,
            &mut fx.freelist,
            &fx.registry,
            "filter",
            "test",
            &records,
        )
        .unwrap();
        (fx, written)
    }

    fn run(fx: &Fixture, filter: &Filter) -> Vec<String> {
        process_filter(&fx.config, &fx.registry, "filter", "test", filter).unwrap()
    }

    #[test]
    fn test_filter_int_and() {
        let (fx, written) =
            fixture(FieldType::Int, (1..=8).map(|n| json!(n)).collect());

        let filter = Filter::and(
            Filter::cmp("foo", CmpOp::Gt, "2"),
            Filter::cmp("foo", CmpOp::Lt, "4"),
        );
        assert_eq!(run(&fx, &filter), vec![written[2].clone()]);
    }

    #[test]
    fn test_filter_not() {
        let (fx, written) = fixture(
            FieldType::Int,
            vec![
                json!(1),
                json!(2),
                json!(2),
                json!(3),
                json!(4),
                json!(5),
                json!(6),
                json!(7),
            ],
        );

        let filter = Filter::not(Filter::cmp("foo", CmpOp::Lt, "4"));
        assert_eq!(run(&fx, &filter), written[4..8].to_vec());
    }

    #[test]
    fn test_filter_xor() {
        let (fx, written) = fixture(
            FieldType::Int,
            vec![
                json!(1),
                json!(2),
                json!(2),
                json!(3),
                json!(4),
                json!(5),
                json!(6),
                json!(7),
            ],
        );

        // foo > 2 XOR foo < 4 leaves out only foo = 3.
        let filter = Filter::xor(
            Filter::cmp("foo", CmpOp::Gt, "2"),
            Filter::cmp("foo", CmpOp::Lt, "4"),
        );
        let mut expected = written.clone();
        expected.remove(3);
        assert_eq!(run(&fx, &filter), expected);
    }

    #[test]
    fn test_filter_bool_eq() {
        let (fx, written) = fixture(
            FieldType::Bool,
            vec![
                json!(true),
                json!(true),
                json!(true),
                json!(false),
                json!(false),
                json!(false),
                json!(false),
                json!(false),
            ],
        );

        let filter = Filter::cmp("foo", CmpOp::Eq, "true");
        assert_eq!(run(&fx, &filter), written[..3].to_vec());
    }

    #[test]
    fn test_filter_float_lt() {
        let (fx, written) = fixture(
            FieldType::Float,
            vec![
                json!(1.0),
                json!(2.0),
                json!(2.0),
                json!(3.0),
                json!(4.0),
                json!(5.0),
                json!(6.0),
                json!(7.0),
            ],
        );

        let filter = Filter::cmp("foo", CmpOp::Lt, "3.0");
        assert_eq!(run(&fx, &filter), written[..3].to_vec());
    }

    #[test]
    fn test_filter_string_ne() {
        let (fx, written) = fixture(
            FieldType::String,
            vec![json!("a"), json!("b"), json!("a")],
        );

        let filter = Filter::cmp("foo", CmpOp::Ne, "a");
        assert_eq!(run(&fx, &filter), vec![written[1].clone()]);
    }

    #[test]
    fn test_filter_skips_records_missing_the_field() {
        let (mut fx, written) = fixture(FieldType::Int, vec![json!(1)]);

        // A second declared field lets a record omit `foo`.
        let schema: CollectionSchema = [
            ("foo".to_string(), FieldType::Int),
            ("other".to_string(), FieldType::Int),
        ]
        .into_iter()
        .collect();
        fx.registry.define("filter", "test", schema);
        let missing: Record = serde_json::from_value(json!({"other": 9})).unwrap();
        collection::write(
            &fx.config,
            &mut fx.freelist,
            &fx.registry,
            "filter",
            "test",
            &[missing],
        )
        .unwrap();

        let filter = Filter::cmp("foo", CmpOp::Ge, "0");
        assert_eq!(run(&fx, &filter), written);

        // But NOT still counts it, through the universe.
        let complement = Filter::not(Filter::cmp("foo", CmpOp::Ge, "0"));
        assert_eq!(run(&fx, &complement).len(), 1);
    }

    #[test]
    fn test_filter_bad_literal() {
        let (fx, _) = fixture(FieldType::Int, vec![json!(1)]);
        let filter = Filter::cmp("foo", CmpOp::Eq, "many");
        match process_filter(&fx.config, &fx.registry, "filter", "test", &filter) {
            Err(CeresError::Parse(_)) => {}
            other => panic!("expected Parse error, got {other:?}"),
        }
    }

    #[test]
    fn test_filter_undeclared_field() {
        let (fx, _) = fixture(FieldType::Int, vec![json!(1)]);
        let filter = Filter::cmp("nope", CmpOp::Eq, "1");
        match process_filter(&fx.config, &fx.registry, "filter", "test", &filter) {
            Err(CeresError::Schema(_)) => {}
            other => panic!("expected Schema error, got {other:?}"),
        }
    }
}
