use super::*;

use proptest::prelude::*;
use proptest::test_runner::TestCaseError;
use std::collections::BTreeMap;

/// Walks every sibling chain from the root and checks that the double array,
/// the link table and the allocator agree with each other.
pub(crate) fn validate<E: Encoding>(t: &Cedar<E>) {
    let a = &t.alloc;
    a.verify();
    assert_eq!(a.nodes.base(0), E::ROOT_BASE, "root base");
    assert_eq!(a.nodes.check(0), -1, "root check");

    let mut reached = 0usize;
    let mut stack = vec![0i32];
    while let Some(from) = stack.pop() {
        let raw = a.nodes.base(from);
        if E::is_value_leaf(raw) {
            assert_ne!(raw, VALUE_LIMIT, "leaf {from} left without a value");
            assert_eq!(a.links.child(from), 0, "leaf {from} has a child link");
            continue;
        }
        let base = E::child_base(raw);
        assert!(base >= 0, "interior node {from} without children");

        let mut c = a.links.child(from);
        if from == 0 {
            // The root's label-0 slot is the root itself.
            assert_eq!(c, 0);
            c = a.links.sibling(base);
            if c == 0 {
                continue;
            }
        }

        let mut prev: Option<u8> = None;
        loop {
            let to = base ^ c as i32;
            assert_eq!(a.nodes.check(to), from, "child {c} of {from} at {to}");
            if c == 0 {
                assert!(prev.is_none(), "terminal of {from} not first");
            } else {
                stack.push(to);
            }
            if let (true, Some(p)) = (t.ordered, prev) {
                assert!(c > p, "children of {from} out of order: {p} then {c}");
            }
            reached += 1;
            prev = Some(c);
            c = a.links.sibling(to);
            if c == 0 {
                break;
            }
        }
    }
    assert_eq!(
        reached + 1,
        a.size - a.free_slots(),
        "used slots must all be reachable from the root"
    );
}

#[derive(Clone, Debug)]
enum Op {
    Insert(Vec<u8>, i32),
    Remove(Vec<u8>),
    Get(Vec<u8>),
    Predict(Vec<u8>),
}

fn key_strategy() -> impl Strategy<Value = Vec<u8>> + Clone {
    // A narrow alphabet forces shared prefixes and slot conflicts.
    let byte = prop_oneof![3 => b'a'..=b'd', 1 => 1u8..=255];
    prop::collection::vec(byte, 1..=12)
}

fn ops_strategy() -> impl Strategy<Value = Vec<Op>> {
    let key = key_strategy();
    let op = prop_oneof![
        50 => (key.clone(), 0..1_000_000i32).prop_map(|(k, v)| Op::Insert(k, v)),
        25 => key.clone().prop_map(Op::Remove),
        20 => key.clone().prop_map(Op::Get),
        5 => prop::collection::vec(b'a'..=b'd', 0..=3).prop_map(Op::Predict),
    ];
    prop::collection::vec(op, 0..=1500)
}

fn model_predict(m: &BTreeMap<Vec<u8>, i32>, prefix: &[u8]) -> Vec<(Vec<u8>, i32)> {
    m.range(prefix.to_vec()..)
        .take_while(|(k, _)| k.starts_with(prefix))
        .map(|(k, v)| (k.clone(), *v))
        .collect()
}

fn run_ops<E: Encoding>(ops: &[Op], ordered: bool) -> std::result::Result<(), TestCaseError> {
    let mut t: Cedar<E> = Cedar::with_options(Options::default().ordered(ordered)).unwrap();
    let mut m: BTreeMap<Vec<u8>, i32> = BTreeMap::new();

    for op in ops {
        match op {
            Op::Insert(key, value) => {
                let old_t = t.update(key, *value).unwrap();
                let old_m = m.insert(key.clone(), *value);
                prop_assert_eq!(old_t, old_m);
            }
            Op::Remove(key) => {
                let old_t = t.erase(key).found();
                let old_m = m.remove(key.as_slice());
                prop_assert_eq!(old_t, old_m);
            }
            Op::Get(key) => {
                prop_assert_eq!(t.find(key).found(), m.get(key.as_slice()).copied());
            }
            Op::Predict(prefix) => {
                let mut got: Vec<(Vec<u8>, i32)> = t
                    .predict(prefix)
                    .map(|hit| ([prefix.as_slice(), t.suffix_of(&hit).as_slice()].concat(), hit.value))
                    .collect();
                if !ordered {
                    got.sort();
                }
                prop_assert_eq!(got, model_predict(&m, prefix));
            }
        }
    }

    validate(&t);
    let mut got: Vec<(Vec<u8>, i32)> = t.iter().collect();
    if !ordered {
        got.sort();
    }
    let expected: Vec<(Vec<u8>, i32)> = m.iter().map(|(k, v)| (k.clone(), *v)).collect();
    prop_assert_eq!(&got, &expected);

    let loaded = Cedar::<E>::from_bytes(&t.to_bytes()).unwrap();
    let mut reloaded: Vec<(Vec<u8>, i32)> = loaded.iter().collect();
    if !ordered {
        reloaded.sort();
    }
    prop_assert_eq!(reloaded, expected);
    Ok(())
}

fn run_text_queries<E: Encoding>(
    keys: &[Vec<u8>],
    text: &[u8],
) -> std::result::Result<(), TestCaseError> {
    let mut t: Cedar<E> = Cedar::new();
    let mut m: BTreeMap<Vec<u8>, i32> = BTreeMap::new();
    for (i, key) in keys.iter().enumerate() {
        t.update(key, i as i32).unwrap();
        m.insert(key.clone(), i as i32);
    }

    let mut expected = Vec::new();
    for start in 0..text.len() {
        for end in start + 1..=text.len() {
            if let Some(&value) = m.get(&text[start..end]) {
                expected.push(TextMatch { start, end, value });
            }
        }
    }
    prop_assert_eq!(t.scan(text).collect::<Vec<_>>(), expected);

    let prefixes: Vec<(usize, i32)> = (1..=text.len())
        .filter_map(|end| m.get(&text[..end]).map(|&v| (end, v)))
        .collect();
    let got: Vec<(usize, i32)> = t.with_common_prefix(text).map(|hit| (hit.length, hit.value)).collect();
    prop_assert_eq!(got, prefixes);
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 256,
        max_shrink_iters: 50_000,
        .. ProptestConfig::default()
    })]

    #[test]
    fn prop_equivalence_standard(ops in ops_strategy()) {
        run_ops::<Standard>(&ops, true)?;
    }

    #[test]
    fn prop_equivalence_reduced(ops in ops_strategy()) {
        run_ops::<Reduced>(&ops, true)?;
    }

    #[test]
    fn prop_equivalence_unordered(ops in ops_strategy()) {
        run_ops::<Standard>(&ops, false)?;
        run_ops::<Reduced>(&ops, false)?;
    }

    #[test]
    fn prop_text_queries(
        keys in prop::collection::vec(prop::collection::vec(b'a'..=b'c', 1..=4), 0..=40),
        text in prop::collection::vec(b'a'..=b'c', 0..=24),
    ) {
        run_text_queries::<Standard>(&keys, &text)?;
        run_text_queries::<Reduced>(&keys, &text)?;
    }
}

fn for_each_permutation<T: Clone>(items: &[T], mut f: impl FnMut(Vec<T>)) {
    fn rec<T: Clone>(items: &[T], used: &mut [bool], out: &mut Vec<T>, f: &mut impl FnMut(Vec<T>)) {
        if out.len() == items.len() {
            f(out.clone());
            return;
        }
        for i in 0..items.len() {
            if used[i] {
                continue;
            }
            used[i] = true;
            out.push(items[i].clone());
            rec(items, used, out, f);
            out.pop();
            used[i] = false;
        }
    }

    let mut used = vec![false; items.len()];
    let mut out = Vec::with_capacity(items.len());
    rec(items, &mut used, &mut out, &mut f);
}

fn small_set() -> Vec<Vec<u8>> {
    vec![
        b"a".to_vec(),
        b"b".to_vec(),
        b"c".to_vec(),
        b"aa".to_vec(),
        b"ab".to_vec(),
        b"ba".to_vec(),
    ]
}

fn insert_order<E: Encoding>() {
    for_each_permutation(&small_set(), |perm| {
        let mut t: Cedar<E> = Cedar::new();
        let mut m: BTreeMap<Vec<u8>, i32> = BTreeMap::new();

        for (i, k) in perm.into_iter().enumerate() {
            let v = i as i32;
            assert_eq!(t.update(&k, v).unwrap(), m.insert(k, v));
        }

        validate(&t);
        let got: Vec<(Vec<u8>, i32)> = t.iter().collect();
        let expected: Vec<(Vec<u8>, i32)> = m.into_iter().collect();
        assert_eq!(got, expected);
    });
}

fn remove_order<E: Encoding>() {
    let keys = small_set();

    // Insert in a fixed order, then remove in all permutations.
    let mut base_trie: Cedar<E> = Cedar::new();
    let mut base_map: BTreeMap<Vec<u8>, i32> = BTreeMap::new();
    for (i, k) in keys.iter().enumerate() {
        let v = i as i32;
        assert_eq!(base_trie.update(k, v).unwrap(), base_map.insert(k.clone(), v));
    }

    for_each_permutation(&keys, |perm| {
        let mut t = base_trie.clone();
        let mut m = base_map.clone();

        for k in perm {
            assert_eq!(t.erase(&k).found(), m.remove(k.as_slice()));
            validate(&t);
            let got: Vec<Vec<u8>> = t.keys().collect();
            assert_eq!(got, m.keys().cloned().collect::<Vec<_>>());
        }
        assert_eq!(t.free_slots(), t.allocated_slots() - 1);
    });
}

#[test]
fn exhaustive_insert_order_small_set() {
    insert_order::<Standard>();
    insert_order::<Reduced>();
}

#[test]
fn exhaustive_remove_order_small_set() {
    remove_order::<Standard>();
    remove_order::<Reduced>();
}
