// Small deterministic PRNG for exploration coin flips and weight init.
//
// Not cryptographically secure. Seeded sessions replay identically, which is
// what the tests rely on.

#[derive(Debug, Clone)]
pub struct Prng {
    state: u64,
}

const ZERO_STATE_SUBSTITUTE: u64 = 0x9E3779B97F4A7C15;

impl Prng {
    pub fn new(seed: u64) -> Self {
        // xorshift never leaves the zero state.
        let state = if seed == 0 {
            ZERO_STATE_SUBSTITUTE
        } else {
            seed
        };
        Self { state }
    }

    /// Seed from the wall clock when no explicit seed is configured.
    #[cfg(feature = "std")]
    pub fn from_entropy() -> Self {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(1);
        Self::new(nanos ^ ZERO_STATE_SUBSTITUTE.rotate_left(17))
    }

    pub fn seeded_or_entropy(seed: Option<u64>) -> Self {
        match seed {
            Some(seed) => Self::new(seed),
            #[cfg(feature = "std")]
            None => Self::from_entropy(),
            #[cfg(not(feature = "std"))]
            None => Self::new(1),
        }
    }

    #[inline]
    fn next_u64(&mut self) -> u64 {
        // xorshift64*
        let mut x = self.state;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.state = x;
        x.wrapping_mul(0x2545F4914F6CDD1D)
    }

    #[inline]
    pub fn next_u32(&mut self) -> u32 {
        (self.next_u64() >> 32) as u32
    }

    /// Uniform in [0,1).
    #[inline]
    pub fn next_f32_01(&mut self) -> f32 {
        let mantissa = (self.next_u64() >> 40) as u32; // 24 bits
        (mantissa as f32) / ((1u32 << 24) as f32)
    }

    #[inline]
    pub fn gen_range_f32(&mut self, low: f32, high: f32) -> f32 {
        low + (high - low) * self.next_f32_01()
    }

    /// Fair coin.
    #[inline]
    pub fn next_bool(&mut self) -> bool {
        (self.next_u64() >> 63) == 1
    }

    /// True with probability `p` (clamped to [0,1]).
    #[inline]
    pub fn chance(&mut self, p: f32) -> bool {
        self.next_f32_01() < p.clamp(0.0, 1.0)
    }
}
