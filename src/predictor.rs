//! Constant-velocity motion predictor for tracked elements.
//!
//! Each tracked element owns one predictor. Measurements arrive with roughly
//! 20ms of observation lag, so the predictor smooths the observed position,
//! estimates velocity, and forecasts a short lookahead ahead of the corrected
//! state.
//!
//! The filter keeps an independent scalar variance for each of the four state
//! components (x, y, vx, vy) instead of a full 4x4 covariance. Position and
//! velocity uncertainty are therefore not coupled; the update equations below
//! are the complete model.
//!
//! ```text
//! predict:  x' = x + vx*dt          Px' = Px + q*dt      (same for y, vx, vy)
//! correct:  e  = z - x'             K   = Px' / (Px' + r)
//!           x  = x' + K*e           Px  = (1 - K) * Px'
//!           Kv = Pvx' / (Pvx' + r)  vx  = vx + Kv * (e / dt)
//!                                   Pvx = (1 - Kv) * Pvx'
//! forecast: x + vx * lookahead
//! ```

use crate::config::PredictionConfig;
use crate::pool::Poolable;

/// Speed above which text is considered too blurry to read
pub const DEFAULT_FAST_SCROLL_THRESHOLD: f32 = 500.0;

/// Tuning parameters for a predictor
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PredictorParams {
    pub process_noise: f32,
    pub measurement_noise: f32,
    pub initial_error: f32,
    pub prediction_time_ms: f32,
    pub min_dt_ms: u64,
    pub max_dt_ms: u64,
    /// Vertical speed threshold for scroll direction queries
    pub direction_threshold: f32,
}

impl Default for PredictorParams {
    fn default() -> Self {
        Self::from(&PredictionConfig::default())
    }
}

impl From<&PredictionConfig> for PredictorParams {
    fn from(config: &PredictionConfig) -> Self {
        let min_dt_ms = config.min_dt_ms.max(1);
        Self {
            process_noise: config.process_noise,
            measurement_noise: config.measurement_noise,
            initial_error: config.initial_error,
            prediction_time_ms: config.prediction_time_ms,
            min_dt_ms,
            max_dt_ms: config.max_dt_ms.max(min_dt_ms),
            direction_threshold: config.scroll_direction_threshold,
        }
    }
}

/// Per-axis state of the filter
#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct Axis {
    position: f32,
    velocity: f32,
    position_var: f32,
    velocity_var: f32,
}

impl Axis {
    fn cold(position: f32, initial_error: f32) -> Self {
        Self {
            position,
            velocity: 0.0,
            position_var: initial_error,
            velocity_var: initial_error,
        }
    }

    fn step(&mut self, measured: f32, dt: f32, params: &PredictorParams) {
        // Predict
        let predicted = self.position + self.velocity * dt;
        let position_var = self.position_var + params.process_noise * dt;
        let velocity_var = self.velocity_var + params.process_noise * dt;

        // Correct
        let innovation = measured - predicted;

        let gain = position_var / (position_var + params.measurement_noise);
        self.position = predicted + gain * innovation;
        self.position_var = (1.0 - gain) * position_var;

        let velocity_gain = velocity_var / (velocity_var + params.measurement_noise);
        self.velocity += velocity_gain * (innovation / dt);
        self.velocity_var = (1.0 - velocity_gain) * velocity_var;
    }
}

/// Lag-compensating position estimator for one element
#[derive(Debug, Clone)]
pub struct MotionPredictor {
    params: PredictorParams,
    x: Axis,
    y: Axis,
    last_update_ms: u64,
    initialized: bool,
}

impl MotionPredictor {
    pub fn new(params: PredictorParams) -> Self {
        Self {
            params,
            x: Axis::default(),
            y: Axis::default(),
            last_update_ms: 0,
            initialized: false,
        }
    }

    /// Feed a measurement and get the forecast position.
    ///
    /// The first call after construction or [`reset`](Self::reset) returns the
    /// measurement unchanged.
    pub fn update(&mut self, measured_x: f32, measured_y: f32, time_ms: u64) -> (f32, f32) {
        if !self.initialized {
            self.x = Axis::cold(measured_x, self.params.initial_error);
            self.y = Axis::cold(measured_y, self.params.initial_error);
            self.last_update_ms = time_ms;
            self.initialized = true;
            return (measured_x, measured_y);
        }

        let dt = self.elapsed_seconds(time_ms);
        self.x.step(measured_x, dt, &self.params);
        self.y.step(measured_y, dt, &self.params);
        self.last_update_ms = self.last_update_ms.max(time_ms);

        let lookahead = self.params.prediction_time_ms / 1000.0;
        (
            self.x.position + self.x.velocity * lookahead,
            self.y.position + self.y.velocity * lookahead,
        )
    }

    /// Elapsed time since the last update in seconds, clamped to the dt window
    fn elapsed_seconds(&self, time_ms: u64) -> f32 {
        let min_ms = self.params.min_dt_ms;
        let max_ms = self.params.max_dt_ms;

        let dt_ms = time_ms.saturating_sub(self.last_update_ms).clamp(min_ms, max_ms);
        let dt = dt_ms as f32 / 1000.0;

        // Second guard in seconds-space
        dt.clamp(min_ms as f32 / 1000.0, max_ms as f32 / 1000.0)
    }

    /// Return to the cold-start state
    pub fn reset(&mut self) {
        self.x = Axis::default();
        self.y = Axis::default();
        self.last_update_ms = 0;
        self.initialized = false;
    }

    /// Corrected position estimate (without lookahead)
    pub fn position(&self) -> (f32, f32) {
        (self.x.position, self.y.position)
    }

    /// Velocity estimate in units per second
    pub fn velocity(&self) -> (f32, f32) {
        (self.x.velocity, self.y.velocity)
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn last_update_ms(&self) -> u64 {
        self.last_update_ms
    }

    pub fn speed(&self) -> f32 {
        (self.x.velocity * self.x.velocity + self.y.velocity * self.y.velocity).sqrt()
    }

    pub fn is_fast_scrolling(&self, threshold: f32) -> bool {
        self.speed() > threshold
    }

    /// Positive vertical velocity: elements moving down the screen
    pub fn is_scrolling_down(&self) -> bool {
        self.y.velocity > self.params.direction_threshold
    }

    pub fn is_scrolling_up(&self) -> bool {
        self.y.velocity < -self.params.direction_threshold
    }
}

impl Default for MotionPredictor {
    fn default() -> Self {
        Self::new(PredictorParams::default())
    }
}

impl Poolable for MotionPredictor {
    fn reset(&mut self) {
        MotionPredictor::reset(self);
    }
}
