// CORE SET -- THE CPUMASK OF THE POLICY
// WORD-ARRAY BITMASK OVER CORE IDS. USED FOR ALLOWED-CORE MASKS, DOMAIN
// CORE SETS, AND THE ACTIVE/IDLE ACTIVITY SETS. GROWS ON SET, NEVER SHRINKS.

use std::fmt;

const WORD_BITS: usize = 64;

#[derive(Clone, Default)]
pub struct CoreSet {
    words: Vec<u64>,
}

// EQUALITY IGNORES TRAILING ZERO WORDS LEFT BEHIND BY clear()
impl PartialEq for CoreSet {
    fn eq(&self, other: &Self) -> bool {
        let longest = self.words.len().max(other.words.len());
        (0..longest).all(|i| {
            self.words.get(i).copied().unwrap_or(0) == other.words.get(i).copied().unwrap_or(0)
        })
    }
}

impl Eq for CoreSet {}

impl CoreSet {
    pub fn new() -> Self {
        Self { words: Vec::new() }
    }

    // ALL CORES 0..n
    pub fn all(n: usize) -> Self {
        let mut s = Self::new();
        for core in 0..n {
            s.set(core);
        }
        s
    }

    pub fn single(core: usize) -> Self {
        let mut s = Self::new();
        s.set(core);
        s
    }

    pub fn set(&mut self, core: usize) {
        let word = core / WORD_BITS;
        if word >= self.words.len() {
            self.words.resize(word + 1, 0);
        }
        self.words[word] |= 1u64 << (core % WORD_BITS);
    }

    pub fn clear(&mut self, core: usize) {
        let word = core / WORD_BITS;
        if word < self.words.len() {
            self.words[word] &= !(1u64 << (core % WORD_BITS));
        }
    }

    pub fn test(&self, core: usize) -> bool {
        let word = core / WORD_BITS;
        word < self.words.len() && self.words[word] & (1u64 << (core % WORD_BITS)) != 0
    }

    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|&w| w == 0)
    }

    // POPULATION COUNT
    pub fn weight(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    pub fn is_subset(&self, of: &CoreSet) -> bool {
        self.iter().all(|core| of.test(core))
    }

    pub fn intersects(&self, other: &CoreSet) -> bool {
        self.iter().any(|core| other.test(core))
    }

    pub fn intersection(&self, other: &CoreSet) -> CoreSet {
        let mut out = CoreSet::new();
        for core in self.iter() {
            if other.test(core) {
                out.set(core);
            }
        }
        out
    }

    pub fn union_with(&mut self, other: &CoreSet) {
        for core in other.iter() {
            self.set(core);
        }
    }

    // ASCENDING CORE-ID ORDER -- SCAN ORDER IS LOAD-BEARING FOR TIE-BREAKS
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.words.iter().enumerate().flat_map(|(wi, &word)| {
            (0..WORD_BITS)
                .filter(move |bit| word & (1u64 << bit) != 0)
                .map(move |bit| wi * WORD_BITS + bit)
        })
    }

    pub fn first(&self) -> Option<usize> {
        self.iter().next()
    }
}

// COMPACT RANGE LIST, SYSFS STYLE: "0-3,6,8-11"
impl fmt::Display for CoreSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut cores = self.iter();
        let mut run: Option<(usize, usize)> = cores.next().map(|c| (c, c));
        let mut first = true;
        let mut flush = |f: &mut fmt::Formatter<'_>, lo: usize, hi: usize, first: &mut bool| {
            if !*first {
                write!(f, ",")?;
            }
            *first = false;
            if lo == hi {
                write!(f, "{}", lo)
            } else {
                write!(f, "{}-{}", lo, hi)
            }
        };
        for core in cores {
            match run {
                Some((lo, hi)) if core == hi + 1 => run = Some((lo, core)),
                Some((lo, hi)) => {
                    flush(f, lo, hi, &mut first)?;
                    run = Some((core, core));
                }
                None => run = Some((core, core)),
            }
        }
        if let Some((lo, hi)) = run {
            flush(f, lo, hi, &mut first)?;
        }
        Ok(())
    }
}

impl fmt::Debug for CoreSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CoreSet[{}]", self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_test_clear() {
        let mut s = CoreSet::new();
        assert!(!s.test(5));
        s.set(5);
        assert!(s.test(5));
        assert_eq!(s.weight(), 1);
        s.clear(5);
        assert!(!s.test(5));
        assert!(s.is_empty());
    }

    #[test]
    fn grows_past_word_boundary() {
        let mut s = CoreSet::new();
        s.set(0);
        s.set(64);
        s.set(127);
        assert!(s.test(64));
        assert!(s.test(127));
        assert!(!s.test(63));
        assert_eq!(s.weight(), 3);
    }

    #[test]
    fn iter_ascending() {
        let mut s = CoreSet::new();
        s.set(9);
        s.set(2);
        s.set(70);
        let order: Vec<usize> = s.iter().collect();
        assert_eq!(order, vec![2, 9, 70]);
        assert_eq!(s.first(), Some(2));
    }

    #[test]
    fn subset_and_intersection() {
        let quad = CoreSet::all(4);
        let mut pair = CoreSet::new();
        pair.set(1);
        pair.set(2);
        assert!(pair.is_subset(&quad));
        assert!(!quad.is_subset(&pair));

        let mut other = CoreSet::new();
        other.set(2);
        other.set(7);
        let both = pair.intersection(&other);
        assert_eq!(both.weight(), 1);
        assert!(both.test(2));
        assert!(pair.intersects(&other));
    }

    #[test]
    fn display_range_list() {
        let mut s = CoreSet::new();
        for core in [0, 1, 2, 3, 6, 8, 9] {
            s.set(core);
        }
        assert_eq!(format!("{}", s), "0-3,6,8-9");
        assert_eq!(format!("{}", CoreSet::new()), "");
        assert_eq!(format!("{}", CoreSet::single(4)), "4");
    }
}
