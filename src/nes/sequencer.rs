//! Converts CPU cycles into PPU scanlines and audio samples with exact
//! fractions, so the three clocks never drift apart.

use std::ops::{Add, Mul, Sub};

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};

use super::config::Region;
use super::ppu::DOTS_PER_SCANLINE;

fn gcd(mut a: i64, mut b: i64) -> i64 {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a.abs()
}

/// A reduced fraction with a positive denominator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rational {
    num: i64,
    den: i64,
}

impl Rational {
    /// `den` must be non-zero; a zero denominator yields zero.
    pub fn new(num: i64, den: i64) -> Self {
        if den == 0 {
            return Self::integer(0);
        }
        let sign = if den < 0 { -1 } else { 1 };
        let divisor = gcd(num, den).max(1);
        Self {
            num: sign * num / divisor,
            den: sign * den / divisor,
        }
    }

    pub const fn integer(value: i64) -> Self {
        Self { num: value, den: 1 }
    }

    pub fn num(self) -> i64 {
        self.num
    }

    pub fn den(self) -> i64 {
        self.den
    }

    pub fn is_positive(self) -> bool {
        self.num > 0
    }

    pub fn floor(self) -> i64 {
        self.num.div_euclid(self.den)
    }

    fn is_valid(self) -> bool {
        self.den > 0 && gcd(self.num, self.den) <= 1
    }
}

impl Add for Rational {
    type Output = Rational;

    fn add(self, rhs: Rational) -> Rational {
        Rational::new(self.num * rhs.den + rhs.num * self.den, self.den * rhs.den)
    }
}

impl Sub for Rational {
    type Output = Rational;

    fn sub(self, rhs: Rational) -> Rational {
        Rational::new(self.num * rhs.den - rhs.num * self.den, self.den * rhs.den)
    }
}

impl Mul<i64> for Rational {
    type Output = Rational;

    fn mul(self, rhs: i64) -> Rational {
        Rational::new(self.num * rhs, self.den)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequencerState {
    pub dots_remaining: Rational,
    pub sample_credit: Rational,
    pub cycles: u64,
}

#[derive(Debug, Clone)]
pub struct Sequencer {
    dots_per_cycle: Rational,
    samples_per_cycle: Rational,
    /// Numerator of the CPU clock; every sample credit's denominator divides it.
    clock_num: i64,
    dots_remaining: Rational,
    sample_credit: Rational,
    cycles: u64,
}

impl Sequencer {
    pub fn new(region: Region, sample_rate: u32) -> Self {
        let (dots_num, dots_den) = region.dots_per_cycle();
        let mut sequencer = Self {
            dots_per_cycle: Rational::new(dots_num as i64, dots_den as i64),
            samples_per_cycle: Rational::integer(0),
            clock_num: region.cpu_hz().0 as i64,
            dots_remaining: Rational::integer(DOTS_PER_SCANLINE as i64),
            sample_credit: Rational::integer(0),
            cycles: 0,
        };
        sequencer.set_sample_rate(region, sample_rate);
        sequencer
    }

    pub fn set_sample_rate(&mut self, region: Region, sample_rate: u32) {
        let (hz_num, hz_den) = region.cpu_hz();
        self.samples_per_cycle =
            Rational::new(sample_rate as i64 * hz_den as i64, hz_num as i64);
    }

    pub fn reset(&mut self) {
        self.dots_remaining = Rational::integer(DOTS_PER_SCANLINE as i64);
        self.sample_credit = Rational::integer(0);
    }

    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    /// Charges `cycles` CPU cycles against the current scanline and returns
    /// how many audio samples fell due.
    pub fn advance(&mut self, cycles: u32) -> u32 {
        self.cycles += u64::from(cycles);
        self.dots_remaining = self.dots_remaining - self.dots_per_cycle * cycles as i64;
        self.sample_credit = self.sample_credit + self.samples_per_cycle * cycles as i64;

        let due = self.sample_credit.floor().max(0);
        self.sample_credit = self.sample_credit - Rational::integer(due);
        due as u32
    }

    pub fn scanline_due(&self) -> bool {
        !self.dots_remaining.is_positive()
    }

    /// Credits the next scanline's dots after one has been executed.
    pub fn finish_scanline(&mut self, next_line_dots: u16) {
        self.dots_remaining = self.dots_remaining + Rational::integer(next_line_dots as i64);
    }

    pub fn save_state(&self) -> SequencerState {
        SequencerState {
            dots_remaining: self.dots_remaining,
            sample_credit: self.sample_credit,
            cycles: self.cycles,
        }
    }

    /// Accepts only values a step boundary can produce: between steps every
    /// due scanline has run, so `0 < dots_remaining <= 341`, and whole
    /// samples have been paid out, so `0 <= sample_credit < 1`. Denominators
    /// must divide the clock fractions they accumulate from.
    pub fn restore_state(&mut self, state: &SequencerState) -> Result<()> {
        let (dots, credit) = (state.dots_remaining, state.sample_credit);
        if !dots.is_valid() || !credit.is_valid() {
            bail!("snapshot sequencer fractions are not reduced");
        }
        if self.dots_per_cycle.den() % dots.den() != 0
            || self.clock_num % credit.den() != 0
        {
            bail!("snapshot sequencer fractions do not match this clock");
        }
        if !dots.is_positive() || dots.num() > DOTS_PER_SCANLINE as i64 * dots.den() {
            bail!(
                "snapshot dot counter {}/{} is outside one scanline",
                dots.num(),
                dots.den()
            );
        }
        if credit.num() < 0 || credit.num() >= credit.den() {
            bail!(
                "snapshot sample credit {}/{} is outside [0, 1)",
                credit.num(),
                credit.den()
            );
        }
        self.dots_remaining = state.dots_remaining;
        self.sample_credit = state.sample_credit;
        self.cycles = state.cycles;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rationals_stay_reduced() {
        let r = Rational::new(6, -4);
        assert_eq!((r.num(), r.den()), (-3, 2));
        assert_eq!(r.floor(), -2);
        let sum = Rational::new(1, 3) + Rational::new(1, 6);
        assert_eq!((sum.num(), sum.den()), (1, 2));
        assert_eq!(Rational::new(5, 0), Rational::integer(0));
    }

    #[test]
    fn ntsc_scanline_takes_341_dots() {
        let mut seq = Sequencer::new(Region::Ntsc, 44_100);
        seq.advance(113);
        assert!(!seq.scanline_due());
        seq.advance(1);
        assert!(seq.scanline_due());
        seq.finish_scanline(341);
        assert!(!seq.scanline_due());
    }

    #[test]
    fn pal_uses_sixteen_fifths_dots_per_cycle() {
        let mut seq = Sequencer::new(Region::Pal, 44_100);
        // 106 cycles = 339.2 dots; 107 cycles = 342.4 dots.
        seq.advance(106);
        assert!(!seq.scanline_due());
        seq.advance(1);
        assert!(seq.scanline_due());
        seq.finish_scanline(341);
        assert_eq!(seq.save_state().dots_remaining, Rational::new(1698, 5));
    }

    #[test]
    fn samples_paced_exactly_over_eleven_seconds() {
        let mut seq = Sequencer::new(Region::Ntsc, 44_100);
        // NTSC runs 19_687_500 / 11 cycles per second.
        let total_cycles: u64 = 19_687_500;
        let mut samples: u64 = 0;
        let mut left = total_cycles;
        while left > 0 {
            let chunk = left.min(113) as u32;
            samples += u64::from(seq.advance(chunk));
            left -= u64::from(chunk);
        }
        assert_eq!(samples, 44_100 * 11);
        assert_eq!(seq.save_state().sample_credit, Rational::integer(0));
    }

    #[test]
    fn restore_rejects_counters_a_step_cannot_leave() {
        let mut seq = Sequencer::new(Region::Ntsc, 44_100);
        seq.advance(50);
        let good = seq.save_state();

        let huge_credit = SequencerState {
            sample_credit: Rational::integer(i64::MAX / 2),
            ..good
        };
        let negative_credit = SequencerState {
            sample_credit: Rational::new(-1, 2),
            ..good
        };
        let foreign_credit = SequencerState {
            sample_credit: Rational::new(1, 13),
            ..good
        };
        let overdue_dots = SequencerState {
            dots_remaining: Rational::integer(-3_410_000_000),
            ..good
        };
        let zero_dots = SequencerState {
            dots_remaining: Rational::integer(0),
            ..good
        };
        let too_many_dots = SequencerState {
            dots_remaining: Rational::integer(342),
            ..good
        };
        let fractional_ntsc_dots = SequencerState {
            dots_remaining: Rational::new(1698, 5),
            ..good
        };
        for bad in [
            huge_credit,
            negative_credit,
            foreign_credit,
            overdue_dots,
            zero_dots,
            too_many_dots,
            fractional_ntsc_dots,
        ] {
            assert!(seq.restore_state(&bad).is_err(), "accepted {bad:?}");
            assert_eq!(seq.save_state(), good);
        }

        let mut fresh = Sequencer::new(Region::Ntsc, 44_100);
        fresh.restore_state(&good).unwrap();
        assert_eq!(fresh.save_state(), good);
    }

    #[test]
    fn restore_survives_a_sample_rate_change() {
        let mut seq = Sequencer::new(Region::Ntsc, 44_100);
        seq.advance(77);
        let state = seq.save_state();
        let mut other = Sequencer::new(Region::Ntsc, 48_000);
        other.restore_state(&state).unwrap();
        assert_eq!(other.save_state(), state);
    }

    #[test]
    fn restore_accepts_pal_fifths() {
        let mut seq = Sequencer::new(Region::Pal, 48_000);
        seq.advance(107);
        seq.finish_scanline(341);
        let state = seq.save_state();
        let mut fresh = Sequencer::new(Region::Pal, 48_000);
        fresh.restore_state(&state).unwrap();
        assert_eq!(fresh.save_state(), state);
    }

    #[test]
    fn restore_rejects_unreduced_fractions() {
        let mut seq = Sequencer::new(Region::Ntsc, 44_100);
        let mut state = seq.save_state();
        state.dots_remaining = Rational { num: 4, den: 2 };
        assert!(seq.restore_state(&state).is_err());
    }
}
