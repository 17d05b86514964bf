use bytes::Bytes;
use proptest::prelude::*;
use proptest::test_runner::{Config, RngAlgorithm, TestRng, TestRunner};
use sweepd::cache::{SweepCache, cache_key};

#[derive(Debug, Clone)]
enum Op {
   Put(String),
   Get(String),
}

fn key_strategy() -> impl Strategy<Value = String> {
   (0usize..8).prop_map(|i| format!("PX-20240820-00000{i}-E2.0.tar"))
}

fn op_strategy() -> impl Strategy<Value = Op> {
   prop_oneof![
      key_strategy().prop_map(Op::Put),
      key_strategy().prop_map(Op::Get),
   ]
}

/// Recency list, most recently used first.
fn apply(model: &mut Vec<String>, capacity: usize, op: &Op) {
   match op {
      Op::Put(key) => {
         model.retain(|k| k != key);
         model.insert(0, key.clone());
         model.truncate(capacity);
      },
      Op::Get(key) => {
         if let Some(pos) = model.iter().position(|k| k == key) {
            let key = model.remove(pos);
            model.insert(0, key);
         }
      },
   }
}

#[test]
fn cache_keeps_most_recently_used_entries_fixed_seed() {
   let seed = [7u8; 32];
   let mut runner = TestRunner::new_with_rng(
      Config { cases: 64, max_shrink_iters: 0, ..Config::default() },
      TestRng::from_seed(RngAlgorithm::ChaCha, &seed),
   );
   let strategy = (1usize..5, prop::collection::vec(op_strategy(), 1..40));

   runner
      .run(&strategy, |(capacity, ops)| {
         let cache = SweepCache::new(capacity).expect("cache");
         let mut model = Vec::new();
         for op in &ops {
            match op {
               Op::Put(key) => cache.put(key.clone(), Bytes::from(key.clone().into_bytes())),
               Op::Get(key) => {
                  let hit = cache.get(key);
                  prop_assert_eq!(hit.is_some(), model.contains(key));
                  if let Some(payload) = hit {
                     prop_assert_eq!(payload.as_ref(), key.as_bytes());
                  }
               },
            }
            apply(&mut model, capacity, op);
            prop_assert!(cache.size() <= capacity);
            prop_assert_eq!(cache.keys(), model.clone());
         }
         Ok(())
      })
      .expect("proptest");
}

#[test]
fn get_after_put_returns_payload() {
   let cache = SweepCache::new(2).unwrap();
   cache.put("a.nc", Bytes::from_static(b"alpha"));
   assert_eq!(cache.get("a.nc"), Some(Bytes::from_static(b"alpha")));
   assert_eq!(cache.size(), 1);
}

#[test]
fn put_overwrites_without_growing() {
   let cache = SweepCache::new(2).unwrap();
   cache.put("a.nc", Bytes::from_static(b"one"));
   cache.put("a.nc", Bytes::from_static(b"two"));
   assert_eq!(cache.size(), 1);
   assert_eq!(cache.get("a.nc"), Some(Bytes::from_static(b"two")));
}

#[test]
fn touched_entry_survives_eviction() {
   let cache = SweepCache::new(2).unwrap();
   cache.put("a", Bytes::from_static(b"a"));
   cache.put("b", Bytes::from_static(b"b"));
   assert!(cache.get("a").is_some());
   cache.put("c", Bytes::from_static(b"c"));

   assert!(cache.contains("a"));
   assert!(!cache.contains("b"));
   assert!(cache.contains("c"));
}

#[test]
fn contains_does_not_refresh_recency() {
   let cache = SweepCache::new(2).unwrap();
   cache.put("a", Bytes::from_static(b"a"));
   cache.put("b", Bytes::from_static(b"b"));
   assert!(cache.contains("a"));
   cache.put("c", Bytes::from_static(b"c"));
   assert!(!cache.contains("a"));
}

#[test]
fn zero_capacity_is_rejected() {
   assert!(SweepCache::new(0).is_err());
}

#[test]
fn same_basename_in_different_directories_shares_key() {
   assert_eq!(cache_key("/radar/2024/a.nc"), cache_key("/backup/a.nc"));
}
