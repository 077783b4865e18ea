#![forbid(unsafe_code)]

//! Three-way weight editing: keeps domestic/revenue/jobs percentages summing to 100 while one of
//! them is edited. The right neighbour of the edited field absorbs the remainder; the third field
//! only moves when the edit does not fit next to it.

pub const EVEN_SHARE_PCT: f64 = 33.3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WeightField {
    Domestic,
    Revenue,
    Jobs,
}

impl WeightField {
    pub fn right_neighbor(self) -> Self {
        match self {
            WeightField::Domestic => WeightField::Revenue,
            WeightField::Revenue => WeightField::Jobs,
            WeightField::Jobs => WeightField::Domestic,
        }
    }

    pub fn third(self) -> Self {
        self.right_neighbor().right_neighbor()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WeightDraft {
    pub domestic: f64,
    pub revenue: f64,
    pub jobs: f64,
}

impl Default for WeightDraft {
    fn default() -> Self {
        Self::even_split()
    }
}

impl WeightDraft {
    pub fn new(domestic: f64, revenue: f64, jobs: f64) -> Self {
        Self {
            domestic,
            revenue,
            jobs,
        }
    }

    pub fn even_split() -> Self {
        Self::new(EVEN_SHARE_PCT, EVEN_SHARE_PCT, EVEN_SHARE_PCT)
    }

    pub fn get(&self, field: WeightField) -> f64 {
        match field {
            WeightField::Domestic => self.domestic,
            WeightField::Revenue => self.revenue,
            WeightField::Jobs => self.jobs,
        }
    }

    fn set(&mut self, field: WeightField, v: f64) {
        match field {
            WeightField::Domestic => self.domestic = v,
            WeightField::Revenue => self.revenue = v,
            WeightField::Jobs => self.jobs = v,
        }
    }

    pub fn total(&self) -> f64 {
        self.domestic + self.revenue + self.jobs
    }

    pub fn redistribute_on_change(&self, changed: WeightField, raw: f64) -> Self {
        let desired = sanitize_pct(raw);
        let partner = changed.right_neighbor();
        let third = changed.third();
        let third0 = self.get(third);

        let mut out = *self;
        if desired <= 100.0 - third0 {
            out.set(changed, desired);
            out.set(partner, 100.0 - third0 - desired);
            return out;
        }
        // Edit exceeds what is left next to the third field: partner drops to 0.
        let changed_v = desired.min(100.0);
        let third_v = (100.0 - changed_v).max(0.0);
        out.set(changed, changed_v);
        out.set(third, third_v);
        out.set(partner, 100.0 - third_v - changed_v);
        out
    }

    /// Settles the draft when the edited field loses focus: one-decimal values, sum back near 100.
    pub fn settle_on_blur(&self, changed: WeightField) -> Self {
        if is_even_share(self.domestic) && is_even_share(self.revenue) && is_even_share(self.jobs) {
            return Self::even_split();
        }
        let partner_field = changed.right_neighbor();
        let third_field = changed.third();
        let desired = self.get(changed).clamp(0.0, 100.0);
        let third0 = self.get(third_field).clamp(0.0, 100.0);

        let (changed_v, partner_v, third_v) = if desired <= 100.0 - third0 {
            let third = round1(third0);
            let mut changed_v = round1(desired.clamp(0.0, 100.0 - third));
            let mut partner = round1(100.0 - third - changed_v);
            let sum = round1(changed_v + partner + third);
            if sum < 99.0 {
                let diff = round1(100.0 - sum);
                let new_partner = round1((partner + diff).clamp(0.0, 100.0 - third));
                let used = round1(new_partner - partner);
                partner = new_partner;
                if used != diff {
                    changed_v = round1((changed_v + (diff - used)).clamp(0.0, 100.0 - third));
                    partner = round1(100.0 - third - changed_v);
                }
            }
            (changed_v, partner, third)
        } else {
            let mut changed_v = round1(desired.min(100.0));
            let third = round1((100.0 - changed_v).max(0.0));
            let mut partner = round1(100.0 - third - changed_v);
            let sum = round1(changed_v + partner + third);
            if sum < 99.0 {
                let diff = round1(100.0 - sum);
                changed_v = round1((changed_v + diff).clamp(0.0, 100.0 - third));
                partner = round1(100.0 - third - changed_v);
            }
            (changed_v, partner, third)
        };

        let mut out = *self;
        out.set(changed, changed_v);
        out.set(partner_field, partner_v);
        out.set(third_field, third_v);
        out
    }

    /// Payload fractions for `w_*_frac`: each percent to a fraction, then scaled to sum to 1.
    pub fn to_fractions(&self) -> [f64; 3] {
        let mut f = [
            pct_to_frac(self.domestic),
            pct_to_frac(self.revenue),
            pct_to_frac(self.jobs),
        ];
        let sum: f64 = f.iter().sum();
        if sum > 0.0 {
            for v in &mut f {
                *v /= sum;
            }
        }
        f
    }
}

/// `redistribute(changed, value, others) -> (domestic, revenue, jobs)`.
pub fn redistribute(draft: WeightDraft, changed: WeightField, value: f64) -> (f64, f64, f64) {
    let out = draft.redistribute_on_change(changed, value);
    (out.domestic, out.revenue, out.jobs)
}

fn sanitize_pct(x: f64) -> f64 {
    if !x.is_finite() {
        return 0.0;
    }
    x.clamp(0.0, 100.0)
}

fn round1(x: f64) -> f64 {
    (x * 10.0).round() / 10.0
}

fn is_even_share(x: f64) -> bool {
    (round1(x) - EVEN_SHARE_PCT).abs() < 0.05
}

fn pct_to_frac(v: f64) -> f64 {
    if !v.is_finite() {
        return 0.0;
    }
    if v > 1.0 {
        (v / 100.0).clamp(0.0, 1.0)
    } else {
        v.clamp(0.0, 1.0)
    }
}
