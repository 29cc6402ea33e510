use std::collections::VecDeque;

use crate::automaton::{Automaton, PADDING, fold_unit};
use crate::error::{Error, MAX_SLOTS};
use crate::trie::{ROOT, Trie};

/// Initial double-array allocation, in slots.
const INITIAL_SLOTS: usize = 65536 * 32;

/// Free-slot miss ratio above which a scanned region is considered full and
/// skipped by later searches.
const DENSITY_THRESHOLD: f64 = 0.95;

/// Collects patterns and encodes them into an immutable [`Automaton`].
///
/// `build` consumes the builder, so no pattern can be added to an automaton
/// that already exists. The builder itself is not thread-safe; callers
/// synchronize concurrent `add` externally.
pub struct AutomatonBuilder<V> {
    trie: Trie,
    key_lengths: Vec<u32>,
    values: Vec<V>,
    ignore_case: bool,
}

impl<V> AutomatonBuilder<V> {
    /// Creates an empty builder. `ignore_case` is frozen here and carried by
    /// the built automaton and its serialized form.
    pub fn new(ignore_case: bool) -> Self {
        Self {
            trie: Trie::new(),
            key_lengths: Vec::new(),
            values: Vec::new(),
            ignore_case,
        }
    }

    /// Number of patterns added so far.
    pub fn pattern_count(&self) -> usize {
        self.key_lengths.len()
    }

    /// Adds one pattern with its associated value. The pattern index is the
    /// insertion position. An empty key occupies a pattern index but is not
    /// inserted into the trie, so it never produces a hit.
    pub fn add(&mut self, key: &str, value: V) {
        let pattern = self.key_lengths.len() as u32;
        let mut node = ROOT;
        let mut length = 0u32;
        for unit in key.encode_utf16() {
            let unit = if self.ignore_case { fold_unit(unit) } else { unit };
            node = self.trie.add_state(node, unit);
            length += 1;
        }
        self.key_lengths.push(length);
        self.values.push(value);
        if node != ROOT {
            self.trie.add_emit(node, pattern);
        }
    }

    /// Bulk add. When the iterator reports a size, the pattern-indexed
    /// arrays are reserved up front.
    pub fn add_all<K, I>(&mut self, entries: I)
    where
        K: AsRef<str>,
        I: IntoIterator<Item = (K, V)>,
    {
        let entries = entries.into_iter();
        let (lower, _) = entries.size_hint();
        self.key_lengths.reserve(lower);
        self.values.reserve(lower);
        for (key, value) in entries {
            self.add(key.as_ref(), value);
        }
    }

    /// Encodes the collected patterns into an immutable automaton,
    /// discarding the temporary trie.
    pub fn build(self) -> Result<Automaton<V>, Error> {
        let AutomatonBuilder {
            mut trie,
            key_lengths,
            values,
            ignore_case,
        } = self;

        let mut array = DoubleArray::new(key_lengths.len());
        array.encode(&mut trie)?;
        let (fail, output) = construct_failure(&mut trie, array.size);
        let (base, check) = array.compact();

        Ok(Automaton::from_parts(
            base,
            check,
            fail,
            output,
            key_lengths,
            Some(values),
            ignore_case,
        ))
    }
}

/// One slot of a sibling block handed to the double-array encoder.
///
/// `offset` is `code_unit + 1` for a real edge, 0 for the synthetic
/// terminator that marks an accepting state.
struct Sibling {
    offset: usize,
    kind: SiblingKind,
}

enum SiblingKind {
    /// Real trie edge to a child node.
    Child(u32),
    /// Terminator slot carrying the state's largest pattern index.
    Terminal(u32),
}

/// Children of `id` as a sorted sibling block, the terminator first.
fn fetch(trie: &Trie, id: u32) -> Vec<Sibling> {
    let children = trie.children(id);
    let mut siblings = Vec::with_capacity(children.len() + 1);
    if trie.is_acceptable(id) {
        siblings.push(Sibling {
            offset: 0,
            kind: SiblingKind::Terminal(trie.node(id).largest_emit.unwrap()),
        });
    }
    for &(unit, child) in children {
        siblings.push(Sibling {
            offset: unit as usize + 1,
            kind: SiblingKind::Child(child),
        });
    }
    siblings
}

/// Growable `base`/`check` pair plus the bookkeeping the free-block search
/// needs while states are being placed.
struct DoubleArray {
    base: Vec<i32>,
    check: Vec<i32>,
    used: Vec<bool>,
    /// One past the highest occupied slot.
    size: usize,
    /// Left edge for free-block scans; slots below it are known dense.
    next_check_pos: usize,
    /// Terminal slots written so far, used to scale the growth factor.
    progress: usize,
    key_count: usize,
}

impl DoubleArray {
    fn new(key_count: usize) -> Self {
        Self {
            base: Vec::new(),
            check: Vec::new(),
            used: Vec::new(),
            size: 0,
            next_check_pos: 0,
            progress: 0,
            key_count,
        }
    }

    /// Phase 1: breadth-first placement of every sibling block.
    ///
    /// Each dequeued entry is `(parent slot, siblings)`; placing the block
    /// fixes `base[parent]`, writes the block's `check` slots, and either
    /// leaf-encodes or enqueues every sibling.
    fn encode(&mut self, trie: &mut Trie) -> Result<(), Error> {
        self.resize(INITIAL_SLOTS)?;
        self.base[0] = 1;
        self.next_check_pos = 0;

        let root_siblings = fetch(trie, ROOT);
        if root_siblings.is_empty() {
            // No patterns reached the trie: poison every slot so no
            // transition can validate.
            for slot in self.check.iter_mut() {
                *slot = -1;
            }
            return Ok(());
        }

        let mut queue: VecDeque<(Option<usize>, Vec<Sibling>)> = VecDeque::new();
        queue.push_back((None, root_siblings));

        while let Some((parent_slot, siblings)) = queue.pop_front() {
            let begin = self.place(&siblings)?;
            if let Some(slot) = parent_slot {
                self.base[slot] = begin as i32;
            }
            for sibling in &siblings {
                let slot = begin + sibling.offset;
                match sibling.kind {
                    SiblingKind::Terminal(emit) => {
                        self.base[slot] = -(emit as i32) - 1;
                        self.progress += 1;
                    }
                    SiblingKind::Child(child) => {
                        trie.node_mut(child).index = slot;
                        queue.push_back((Some(slot), fetch(trie, child)));
                    }
                }
            }
        }
        Ok(())
    }

    /// Finds and claims a block origin for `siblings`: the first `begin`
    /// such that every `begin + offset` slot is free and `begin` is not
    /// already some block's origin. Writes the block's `check` slots.
    fn place(&mut self, siblings: &[Sibling]) -> Result<usize, Error> {
        let first_offset = siblings[0].offset;
        let last_offset = siblings[siblings.len() - 1].offset;

        let mut pos = (first_offset + 1).max(self.next_check_pos) - 1;
        let mut nonzero = 0usize;
        let mut first_free_seen = false;
        if self.base.len() <= pos {
            self.resize(pos + 1)?;
        }

        let begin = 'outer: loop {
            pos += 1;
            if self.base.len() <= pos {
                self.resize(pos + 1)?;
            }
            if self.check[pos] != 0 {
                nonzero += 1;
                continue;
            }
            if !first_free_seen {
                self.next_check_pos = pos;
                first_free_seen = true;
            }

            let begin = pos - first_offset;
            if self.base.len() <= begin + last_offset {
                let scale =
                    (self.key_count as f64 / (self.progress as f64 + 1.0)).max(1.05);
                let target = (self.base.len() as f64 * scale) as usize;
                self.resize(target.max(begin + last_offset + 1))?;
            }
            if self.used[begin] {
                continue;
            }
            for sibling in &siblings[1..] {
                if self.check[begin + sibling.offset] != 0 {
                    continue 'outer;
                }
            }
            break begin;
        };

        // Skip regions that are nearly full on subsequent searches; this is
        // what keeps construction close to linear.
        if nonzero as f64 / (pos - self.next_check_pos + 1) as f64 >= DENSITY_THRESHOLD {
            self.next_check_pos = pos;
        }

        self.used[begin] = true;
        self.size = self.size.max(begin + last_offset + 1);
        for sibling in siblings {
            self.check[begin + sibling.offset] = begin as i32;
        }
        Ok(begin)
    }

    fn resize(&mut self, new_len: usize) -> Result<(), Error> {
        if new_len > MAX_SLOTS {
            return Err(Error::CapacityExhausted { requested: new_len });
        }
        self.base.resize(new_len, 0);
        self.check.resize(new_len, 0);
        self.used.resize(new_len, false);
        Ok(())
    }

    /// Phase 3: shrink to `size` occupied slots plus the padding the match
    /// loop relies on for unchecked transition arithmetic.
    fn compact(mut self) -> (Vec<i32>, Vec<i32>) {
        let target = self.size + PADDING;
        self.base.truncate(self.size);
        self.base.resize(target, 0);
        self.check.resize(target, 0);
        (self.base, self.check)
    }
}

/// Phase 2: breadth-first failure-link assignment over the trie, recording
/// `fail` by double-array slot and materializing merged output sets.
fn construct_failure(trie: &mut Trie, size: usize) -> (Vec<i32>, Vec<Option<Box<[u32]>>>) {
    let mut fail = vec![0i32; size + 1];
    let mut output: Vec<Option<Box<[u32]>>> = vec![None; size + 1];
    let mut queue: VecDeque<u32> = VecDeque::new();

    let depth_one: Vec<u32> = trie.children(ROOT).iter().map(|&(_, child)| child).collect();
    for child in depth_one {
        trie.node_mut(child).failure = ROOT;
        fail[trie.node(child).index] = 0;
        materialize_output(trie, child, &mut output);
        queue.push_back(child);
    }

    while let Some(current) = queue.pop_front() {
        let transitions: Vec<(u16, u32)> = trie.children(current).to_vec();
        for (unit, target) in transitions {
            queue.push_back(target);

            // Walk failure links until a state with an edge on `unit`; the
            // root self-loop guarantees termination.
            let mut trace = trie.node(current).failure;
            while trie.next_state(trace, unit, false).is_none() {
                trace = trie.node(trace).failure;
            }
            let new_failure = trie.next_state(trace, unit, false).unwrap();

            trie.node_mut(target).failure = new_failure;
            fail[trie.node(target).index] = trie.node(new_failure).index as i32;

            let inherited = trie.node(new_failure).emits.clone();
            trie.node_mut(target).emits.extend(inherited);
            materialize_output(trie, target, &mut output);
        }
    }
    (fail, output)
}

fn materialize_output(trie: &Trie, id: u32, output: &mut [Option<Box<[u32]>>]) {
    let node = trie.node(id);
    if !node.emits.is_empty() {
        output[node.index] = Some(node.emits.clone().into_boxed_slice());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build(patterns: &[&str]) -> Automaton<usize> {
        let mut builder = AutomatonBuilder::new(false);
        for (i, &p) in patterns.iter().enumerate() {
            builder.add(p, i);
        }
        builder.build().unwrap()
    }

    /// Follows `key` through the double array, asserting the §encoding
    /// invariant `check[base[s] + c + 1] == base[s]` on every edge.
    fn walk<V>(automaton: &Automaton<V>, key: &str) -> usize {
        let mut state = 0usize;
        for unit in key.encode_utf16() {
            let b = automaton.base[state];
            let target = (b + i32::from(unit) + 1) as usize;
            assert_eq!(
                b, automaton.check[target],
                "broken transition on {:?} of {:?}",
                unit, key
            );
            state = target;
        }
        state
    }

    #[test]
    fn double_array_is_consistent_for_every_pattern_prefix() {
        let patterns = ["he", "she", "his", "hers", "hershey", "sheet", "s"];
        let automaton = build(&patterns);
        for &p in &patterns {
            for end in 1..=p.len() {
                walk(&automaton, &p[..end]);
            }
        }
    }

    #[test]
    fn accepting_states_carry_terminal_slots() {
        let automaton = build(&["ab", "abc"]);
        for (key, expected) in [("ab", 0i32), ("abc", 1i32)] {
            let state = walk(&automaton, key);
            let b = automaton.base[state];
            let terminal = b as usize;
            assert_eq!(b, automaton.check[terminal]);
            assert_eq!(-(expected + 1), automaton.base[terminal]);
        }
    }

    #[test]
    fn block_origins_are_unique() {
        let patterns = ["abc", "abd", "bcd", "bce", "cde", "a", "b", "c"];
        let automaton = build(&patterns);
        // Distinct parents never share a block origin.
        let mut by_origin = std::collections::HashMap::new();
        for &p in &patterns {
            for end in 0..=p.len() {
                let state = walk(&automaton, &p[..end]);
                let b = automaton.base[state];
                if b > 0 {
                    if let Some(prev) = by_origin.insert(b, state) {
                        assert_eq!(prev, state, "origin {} shared by two states", b);
                    }
                }
            }
        }
    }

    #[test]
    fn compaction_keeps_transition_padding() {
        let automaton = build(&["a", "z", "medium"]);
        assert_eq!(automaton.base.len(), automaton.check.len());
        // fail/output are sized size + 1; base/check are size + padding.
        assert_eq!(automaton.fail.len(), automaton.output.len());
        let size = automaton.base.len() - PADDING;
        assert_eq!(size + 1, automaton.fail.len());
    }

    #[test]
    fn empty_build_poisons_check() {
        let automaton = build(&[]);
        assert_eq!(PADDING, automaton.base.len());
        assert!(automaton.check.iter().all(|&c| c == -1));
        assert_eq!(1, automaton.fail.len());
    }

    #[test]
    fn root_base_is_seeded_to_one() {
        let automaton = build(&["x"]);
        assert_eq!(1, automaton.base[0]);
    }

    #[test]
    fn failure_links_point_to_longest_proper_suffix_state() {
        let automaton = build(&["he", "she", "his", "hers"]);
        // State for "she" fails to the state for "he".
        let she = walk(&automaton, "she");
        let he = walk(&automaton, "he");
        assert_eq!(he as i32, automaton.fail[she]);
        // Depth-1 states fail to the root.
        let h = walk(&automaton, "h");
        assert_eq!(0, automaton.fail[h]);
    }

    #[test]
    fn output_merges_suffix_patterns() {
        let automaton = build(&["abc", "bc", "c"]);
        let abc = walk(&automaton, "abc");
        let merged = automaton.output[abc].as_ref().unwrap();
        // Own pattern first, then inherited by decreasing depth.
        assert_eq!(&[0, 1, 2], merged.as_ref());
    }

    #[test]
    fn add_all_reserves_and_inserts() {
        let mut builder = AutomatonBuilder::new(false);
        builder.add_all(vec![("one", 1), ("two", 2)]);
        assert_eq!(2, builder.pattern_count());
        let automaton = builder.build().unwrap();
        assert_eq!(Some(&2), automaton.value_of("two"));
    }

    #[test]
    fn empty_key_takes_an_index_but_never_matches() {
        let mut builder = AutomatonBuilder::new(false);
        builder.add("", 10);
        builder.add("a", 20);
        let automaton = builder.build().unwrap();
        assert_eq!(2, automaton.pattern_count());
        assert_eq!(Some(&10), automaton.value_at(0));
        assert_eq!(None, automaton.value_of(""));
        let hits = automaton.search("banana");
        assert!(hits.iter().all(|h| h.pattern_index == 1));
    }

    #[test]
    fn long_pattern_forces_a_deep_chain() {
        let key: String = std::iter::repeat('k').take(4000).collect();
        let mut builder = AutomatonBuilder::new(false);
        builder.add(&key, 0);
        builder.add("kk", 1);
        let automaton = builder.build().unwrap();
        assert_eq!(Some(&0), automaton.value_of(&key));
        // Every position after the first pair emits the "kk" suffix.
        assert_eq!(3999, automaton.search(&key).len() - 1);
    }

    #[test]
    fn dense_single_unit_patterns_pack() {
        let mut builder = AutomatonBuilder::new(false);
        for b in 0u8..=255 {
            builder.add(&(b as char).to_string(), b as usize);
        }
        let automaton = builder.build().unwrap();
        assert_eq!(256, automaton.pattern_count());
        assert_eq!(Some(&(b'q' as usize)), automaton.value_of("q"));
        assert_eq!(3, automaton.search("abc").len());
    }
}
