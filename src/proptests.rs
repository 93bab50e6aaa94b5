use super::*;

use proptest::prelude::*;
use proptest_derive::Arbitrary;
use std::collections::BTreeMap;

/// Walk the whole trie and check the structural invariants.
fn validate_trie<V>(db: &NetDb<V>) {
    let Some(root) = db.root else {
        assert_eq!(db.count, 0, "empty trie must have no registered nodes");
        assert_eq!(db.nodes.len(), 0, "empty trie must not hold live nodes");
        return;
    };

    let root_node = db.nodes.get(root);
    assert!(root_node.parent.is_none(), "root must not have a parent");
    assert_eq!(root_node.start, 0, "root segment must start at depth 0");

    // (node, concatenated segment bits from the root)
    let mut stack: Vec<(NodeId, Vec<usize>)> = vec![(root, Vec::new())];
    let mut reachable = 0usize;
    let mut registered = 0usize;

    while let Some((id, mut path)) = stack.pop() {
        let node = db.nodes.get(id);
        reachable += 1;

        path.extend(node.segment());
        assert_eq!(path.len(), node.end as usize, "path length must equal depth");
        let expected: Vec<usize> = (0..node.end).map(|i| key::bit_at(node.key, i)).collect();
        assert_eq!(path, expected, "segments must concatenate to the node key");
        assert_eq!(node.key, key::mask(node.key, node.end), "bits past depth must be zero");

        if node.is_registered() {
            registered += 1;
        } else {
            assert_eq!(
                node.child_count(),
                2,
                "branch-only node at depth {} must fan out",
                node.end
            );
        }

        for (bit, child) in node.children.iter().enumerate() {
            let Some(child) = *child else { continue };
            let c = db.nodes.get(child);
            assert_eq!(c.parent, Some(id), "child must point back to its parent");
            assert_eq!(c.start, node.end, "child segment must start at parent depth");
            assert!(c.end > c.start, "non-root segment must be non-empty");
            assert_eq!(key::bit_at(c.key, c.start), bit, "child must sit in its leading-bit slot");
            assert_eq!(key::mask(c.key, node.end), node.key, "child key must extend parent key");
            stack.push((child, path.clone()));
        }
    }

    assert_eq!(registered, db.count, "registered count must match NetDb::len");
    assert_eq!(reachable, db.nodes.len(), "every live node must be reachable");
    assert_eq!(db.networks(), registered);
    assert_eq!(db.nodes(), reachable);
}

/// Brute-force longest-prefix match over the model.
fn model_lookup(m: &BTreeMap<(u128, u8), u32>, addr: u128) -> Option<(u128, u8, u32)> {
    m.iter()
        .filter(|(k, _)| key::mask(addr, k.1) == k.0)
        .max_by_key(|(k, _)| k.1)
        .map(|(k, v)| (k.0, k.1, *v))
}

/// Key-space form of a rendered network. Unlike `Prefix::from_net` this
/// accepts `0.0.0.0/0`, which is how `::ffff:0:0/96` renders.
fn key_of(net: IpNet) -> (u128, u8) {
    match net {
        IpNet::V4(n) => (u128::from(n.network().to_ipv6_mapped()), n.prefix_len() + 96),
        IpNet::V6(n) => (u128::from(n.network()), n.prefix_len()),
    }
}

const BASES: [u128; 3] = [
    0,
    // ::ffff:10.0.0.0
    (0xffff << 32) | (10 << 24),
    // 2001:db8::
    0x2001_0db8 << 96,
];

/// Prefixes clustered around a few bases so paths overlap and diverge often.
fn prefix_strategy() -> impl Strategy<Value = Prefix> {
    (
        prop::sample::select(BASES.to_vec()),
        any::<u16>(),
        prop::sample::select(vec![0u32, 8, 16, 40, 100, 112]),
        1u8..=128,
    )
        .prop_map(|(base, noise, shift, len)| {
            Prefix::new(base ^ (u128::from(noise) << shift), len).unwrap()
        })
}

fn addr_strategy() -> impl Strategy<Value = u128> {
    prop_oneof![
        3 => (prefix_strategy(), any::<u128>()).prop_map(|(p, host)| {
            p.bits() | (host & !key::mask(u128::MAX, p.prefix_len()))
        }),
        1 => any::<u128>(),
    ]
}

#[derive(Clone, Debug, Arbitrary)]
enum Op {
    #[proptest(weight = 5)]
    Insert(#[proptest(strategy = "prefix_strategy()")] Prefix, u32),
    #[proptest(weight = 2)]
    Remove(#[proptest(strategy = "prefix_strategy()")] Prefix),
    #[proptest(weight = 3)]
    Lookup(#[proptest(strategy = "addr_strategy()")] u128),
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 256,
        max_shrink_iters: 10_000,
        .. ProptestConfig::default()
    })]

    #[test]
    fn prop_equivalence(ops in prop::collection::vec(any::<Op>(), 0..=400)) {
        let mut db: NetDb<u32> = NetDb::new();
        let mut m: BTreeMap<(u128, u8), u32> = BTreeMap::new();

        for op in ops {
            match op {
                Op::Insert(p, v) => {
                    let old_db = db.insert_prefix(p, v);
                    let old_m = m.insert((p.bits(), p.prefix_len()), v);
                    prop_assert_eq!(old_db, old_m);
                }
                Op::Remove(p) => {
                    let old_db = db.remove_prefix(p);
                    let old_m = m.remove(&(p.bits(), p.prefix_len()));
                    prop_assert_eq!(old_db, old_m);
                }
                Op::Lookup(addr) => {
                    let got = db.lookup_bits(addr).map(|(net, v)| {
                        let (bits, len) = key_of(net);
                        (bits, len, *v)
                    });
                    prop_assert_eq!(got, model_lookup(&m, addr));
                }
            }
            prop_assert_eq!(db.len(), m.len());
        }

        validate_trie(&db);
        let got: Vec<((u128, u8), u32)> = db
            .iter()
            .map(|(net, v)| (key_of(net), *v))
            .collect();
        let expected: Vec<((u128, u8), u32)> = m.into_iter().collect();
        prop_assert_eq!(got, expected);
    }

    #[test]
    fn prop_host_addresses_match_containing_network(
        p in prefix_strategy(),
        host in any::<u128>(),
    ) {
        let mut db: NetDb<u32> = NetDb::new();
        db.insert_prefix(p, 1);

        let addr = p.bits() | (host & !key::mask(u128::MAX, p.prefix_len()));
        let (net, v) = db.lookup_bits(addr).unwrap();
        prop_assert_eq!(*v, 1);
        prop_assert_eq!(key_of(net), (p.bits(), p.prefix_len()));
    }

    #[test]
    fn prop_nested_networks_prefer_most_specific(
        p in prefix_strategy(),
        extra in 1u8..=127,
        host in any::<u128>(),
    ) {
        prop_assume!(p.prefix_len() < 128);
        let inner_len = (p.prefix_len() + extra).min(128);
        let inner = Prefix::new(p.bits() | (host >> p.prefix_len()), inner_len).unwrap();

        let mut db: NetDb<u32> = NetDb::new();
        db.insert_prefix(inner, 2);
        db.insert_prefix(p, 1);
        validate_trie(&db);

        let inside = inner.bits() | (host & !key::mask(u128::MAX, inner_len));
        let (net, v) = db.lookup_bits(inside).unwrap();
        prop_assert_eq!(*v, 2);
        prop_assert_eq!(key_of(net), (inner.bits(), inner.prefix_len()));
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

const SMALL_SET: [&str; 6] = [
    "10.0.0.0/8",
    "10.0.0.0/7",
    "11.0.0.0/8",
    "10.1.0.0/16",
    "10.1.2.3",
    "::1",
];

#[test]
fn exhaustive_insert_order_small_set() {
    let mut shapes = Vec::new();
    for_each_permutation(&SMALL_SET, |perm| {
        let mut db: NetDb<&str> = NetDb::new();
        for net in perm {
            assert_eq!(db.insert(net, net).unwrap(), None);
        }
        validate_trie(&db);

        assert_eq!(db.lookup("10.1.2.3").unwrap().payload, "10.1.2.3");
        assert_eq!(db.lookup("10.1.2.4").unwrap().payload, "10.1.0.0/16");
        assert_eq!(db.lookup("10.2.0.0").unwrap().payload, "10.0.0.0/8");
        assert_eq!(db.lookup("11.2.0.0").unwrap().payload, "11.0.0.0/8");
        assert_eq!(db.lookup("::1").unwrap().payload, "::1");
        assert!(db.lookup("::2").is_err());

        shapes.push(db.nodes());
    });
    // The compressed shape depends only on the set of keys.
    assert!(shapes.windows(2).all(|w| w[0] == w[1]));
}

#[test]
fn exhaustive_remove_order_small_set() {
    let mut base: NetDb<&str> = NetDb::new();
    for net in SMALL_SET {
        base.insert(net, net).unwrap();
    }

    for_each_permutation(&SMALL_SET, |perm| {
        let mut db = base.clone();
        let mut left: Vec<&str> = SMALL_SET.to_vec();

        for net in perm {
            assert_eq!(db.remove(net).unwrap(), Some(net));
            left.retain(|n| *n != net);
            assert_eq!(db.len(), left.len());
            validate_trie(&db);

            // A trie rebuilt from the survivors has the same shape.
            let mut rebuilt: NetDb<&str> = NetDb::new();
            for n in &left {
                rebuilt.insert(n, n).unwrap();
            }
            assert_eq!(db.nodes(), rebuilt.nodes());
        }
        assert!(db.is_empty());
        assert!(db.root.is_none());
    });
}
