//! Seedable deterministic random source.
//!
//! A textual seed is hashed into four 32-bit words (xmur3 avalanche hash),
//! which seed a 32-bit add-rotate-xor generator (sfc32). Every draw below is
//! derived from the single `[0, 1)` primitive, so for a fixed seed and call
//! order the whole sequence is reproducible, bit for bit, across runs and
//! across consumers (engine sampling and the artwork's own randomness).

use std::collections::BTreeMap;

/// Deterministic generator seeded from a string.
#[derive(Debug, Clone)]
pub struct Prng {
    seed: String,
    state: [u32; 4],
}

impl Prng {
    pub fn new(seed: impl Into<String>) -> Self {
        let seed = seed.into();
        let mut hash = Xmur3::new(&seed);
        let state = [hash.next(), hash.next(), hash.next(), hash.next()];
        Self { seed, state }
    }

    /// Generator seeded with a fresh random hash.
    pub fn from_entropy() -> Self {
        Self::new(Self::generate_seed())
    }

    /// Random seed of the form `0x` followed by 64 hex digits.
    pub fn generate_seed() -> String {
        format!(
            "0x{}{}",
            uuid::Uuid::new_v4().simple(),
            uuid::Uuid::new_v4().simple()
        )
    }

    pub fn seed(&self) -> &str {
        &self.seed
    }

    /// Uniform real in `[0, 1)`.
    pub fn random_dec(&mut self) -> f64 {
        let [a, b, c, d] = self.state;
        let t = a.wrapping_add(b).wrapping_add(d);
        let d = d.wrapping_add(1);
        let a = b ^ (b >> 9);
        let b = c.wrapping_add(c << 3);
        let c = c.rotate_left(21).wrapping_add(t);
        self.state = [a, b, c, d];
        f64::from(t) / 4_294_967_296.0
    }

    /// Uniform real in `[a, b)`.
    pub fn random_num(&mut self, a: f64, b: f64) -> f64 {
        a + (b - a) * self.random_dec()
    }

    /// Uniform integer in `[a, b]` inclusive, drawn as `floor` of a real over `[a, b + 1)`.
    ///
    /// Requires `a <= b` for a proper distribution.
    pub fn random_int(&mut self, a: i64, b: i64) -> i64 {
        let v = self.random_num(a as f64, b as f64 + 1.0).floor() as i64;
        v.min(a.max(b))
    }

    /// `true` with probability `p`.
    pub fn random_bool(&mut self, p: f64) -> bool {
        self.random_dec() < p
    }

    /// Uniform element of `list`; `None` when it is empty.
    pub fn random_choice<'a, T>(&mut self, list: &'a [T]) -> Option<&'a T> {
        let i = self.random_int(0, list.len() as i64 - 1);
        usize::try_from(i).ok().and_then(|i| list.get(i))
    }

    /// Uniform entry of a keyed collection (key order).
    pub fn random_entry<'a, K, V>(&mut self, map: &'a BTreeMap<K, V>) -> Option<(&'a K, &'a V)> {
        let i = self.random_int(0, map.len() as i64 - 1);
        usize::try_from(i).ok().and_then(|i| map.iter().nth(i))
    }

    pub fn random_key<'a, K, V>(&mut self, map: &'a BTreeMap<K, V>) -> Option<&'a K> {
        self.random_entry(map).map(|(k, _)| k)
    }

    pub fn random_value<'a, K, V>(&mut self, map: &'a BTreeMap<K, V>) -> Option<&'a V> {
        self.random_entry(map).map(|(_, v)| v)
    }

    /// Fisher–Yates shuffle of a copy of `items`.
    pub fn random_shuffle<T: Clone>(&mut self, items: &[T]) -> Vec<T> {
        let mut copy = items.to_vec();
        for i in (1..copy.len()).rev() {
            let j = self.random_int(0, i as i64) as usize;
            copy.swap(i, j);
        }
        copy
    }

    /// Weighted pick over parallel `items`/`weights`.
    ///
    /// Selects the first item whose cumulative weight meets or exceeds a draw
    /// scaled by the total weight. Returns the index alongside the item.
    pub fn random_weighted<'a, T>(
        &mut self,
        items: &'a [T],
        weights: &[f64],
    ) -> Option<(usize, &'a T)> {
        let cumulative: Vec<f64> = weights
            .iter()
            .scan(0.0, |acc, w| {
                *acc += w;
                Some(*acc)
            })
            .collect();
        let total = *cumulative.last()?;
        let r = total * self.random_dec();
        items
            .iter()
            .zip(&cumulative)
            .position(|(_, c)| *c >= r)
            .map(|i| (i, &items[i]))
    }
}

/// xmur3 string hash; each call to `next` yields one more 32-bit word.
struct Xmur3 {
    h: u32,
}

impl Xmur3 {
    fn new(seed: &str) -> Self {
        // Hash UTF-16 code units so seeds agree with browser-side consumers.
        let units: Vec<u16> = seed.encode_utf16().collect();
        let mut h = 1_779_033_703u32 ^ units.len() as u32;
        for unit in units {
            h = (h ^ u32::from(unit)).wrapping_mul(3_432_918_353);
            h = h.rotate_left(13);
        }
        Self { h }
    }

    fn next(&mut self) -> u32 {
        let mut h = self.h;
        h = (h ^ (h >> 16)).wrapping_mul(2_246_822_507);
        h = (h ^ (h >> 13)).wrapping_mul(3_266_489_909);
        h ^= h >> 16;
        self.h = h;
        h
    }
}
