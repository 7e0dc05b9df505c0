use super::place::{Place, PlaceId, PlaceSet, Token};

pub type DelayFn<P> = Box<dyn FnMut(&PlaceSet<P>) -> u64>;
pub type WeightFn<P> = Box<dyn Fn(&PlaceSet<P>) -> usize>;
pub type GuardFn<P> = Box<dyn Fn(&Place<P>) -> bool>;
pub type ProduceFn<P> = Box<dyn FnMut(&PlaceSet<P>) -> Vec<P>>;

/// How many tokens an input arc takes.
pub enum Weight<P> {
  Fixed(usize),
  Dynamic(WeightFn<P>),
  /// Inhibitor arc: enabled only while the place is empty, consumes nothing.
  Inhibit,
}

pub struct InputArc<P> {
  place: PlaceId,
  weight: Weight<P>,
  /// Tokens that must be present before enabling; defaults to the weight.
  threshold: Option<usize>,
  guard: Option<GuardFn<P>>,
}

pub struct OutputArc<P> {
  place: PlaceId,
  produce: ProduceFn<P>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransitionId(pub(crate) usize);

/// A timed transition.
///
/// Disabled until every input holds its required tokens and every guard
/// passes. Then it is pending with a fixed `maturation_time`, and fires once
/// simulation time reaches it.
pub struct Transition<P> {
  id: String,
  delay: DelayFn<P>,
  inputs: Vec<InputArc<P>>,
  outputs: Vec<OutputArc<P>>,
  maturation_time: Option<u64>,
  pipeline_offset: Option<u64>,
  pipeline_ready_time: u64,
  consume: Vec<usize>,
  disabled: bool,
  fire_count: u64,
}

impl<P: Clone + 'static> Transition<P> {
  pub fn new(id: impl Into<String>, delay: impl FnMut(&PlaceSet<P>) -> u64 + 'static) -> Self {
    Self {
      id: id.into(),
      delay: Box::new(delay),
      inputs: Vec::new(),
      outputs: Vec::new(),
      maturation_time: None,
      pipeline_offset: None,
      pipeline_ready_time: 0,
      consume: Vec::new(),
      disabled: false,
      fire_count: 0,
    }
  }

  pub fn with_delay(id: impl Into<String>, delay: u64) -> Self {
    Self::new(id, move |_| delay)
  }

  pub fn input(self, place: PlaceId, count: usize) -> Self {
    self.arc(place, Weight::Fixed(count), None, None)
  }

  pub fn input_dyn(self, place: PlaceId, weight: impl Fn(&PlaceSet<P>) -> usize + 'static) -> Self {
    self.arc(place, Weight::Dynamic(Box::new(weight)), None, None)
  }

  /// Wait for `threshold` tokens but consume only `count`.
  pub fn input_threshold(self, place: PlaceId, count: usize, threshold: usize) -> Self {
    self.arc(place, Weight::Fixed(count), Some(threshold), None)
  }

  pub fn input_guarded(self, place: PlaceId, count: usize, guard: impl Fn(&Place<P>) -> bool + 'static) -> Self {
    self.arc(place, Weight::Fixed(count), None, Some(Box::new(guard)))
  }

  pub fn inhibitor(self, place: PlaceId) -> Self {
    self.arc(place, Weight::Inhibit, None, None)
  }

  pub fn arc(
    mut self,
    place: PlaceId,
    weight: Weight<P>,
    threshold: Option<usize>,
    guard: Option<GuardFn<P>>,
  ) -> Self {
    self.inputs.push(InputArc {
      place,
      weight,
      threshold,
      guard,
    });
    self
  }

  pub fn output(mut self, place: PlaceId, produce: impl FnMut(&PlaceSet<P>) -> Vec<P> + 'static) -> Self {
    self.outputs.push(OutputArc {
      place,
      produce: Box::new(produce),
    });
    self
  }

  /// Output producing `count` copies of `payload`.
  pub fn output_const(self, place: PlaceId, count: usize, payload: P) -> Self {
    self.output(place, move |_| vec![payload.clone(); count])
  }

  /// Allow the next enabling `offset` after this one instead of waiting for
  /// maturation, modelling a pipelined unit.
  pub fn pipelined(mut self, offset: u64) -> Self {
    self.pipeline_offset = Some(offset);
    self
  }

  pub fn disabled(mut self, disabled: bool) -> Self {
    self.disabled = disabled;
    self
  }
}

impl<P> Transition<P> {
  pub fn id(&self) -> &str {
    &self.id
  }

  pub fn maturation_time(&self) -> Option<u64> {
    self.maturation_time
  }

  pub fn is_pending(&self) -> bool {
    self.maturation_time.is_some()
  }

  pub fn fire_count(&self) -> u64 {
    self.fire_count
  }

  pub fn is_disabled(&self) -> bool {
    self.disabled
  }

  pub fn set_disabled(&mut self, disabled: bool) {
    self.disabled = disabled;
  }

  pub fn pipeline_ready_time(&self) -> u64 {
    self.pipeline_ready_time
  }

  pub(crate) fn output_places(&self) -> impl Iterator<Item = PlaceId> + '_ {
    self.outputs.iter().map(|arc| arc.place)
  }

  pub(crate) fn update_clock(&mut self, now: u64) {
    if self.maturation_time.is_none() {
      self.pipeline_ready_time = self.pipeline_ready_time.max(now);
    }
  }

  pub(crate) fn reset(&mut self) {
    self.maturation_time = None;
    self.pipeline_ready_time = 0;
    self.consume.clear();
    self.fire_count = 0;
  }

  /// Enable check. Returns whether the transition is pending afterwards.
  pub(crate) fn trigger(&mut self, places: &PlaceSet<P>) -> bool {
    if self.maturation_time.is_some() {
      return true;
    }
    if self.disabled {
      return false;
    }

    let mut enable_ts = 0;
    let mut consume = Vec::with_capacity(self.inputs.len());
    for arc in &self.inputs {
      let place = &places[arc.place];
      let take = match &arc.weight {
        Weight::Fixed(n) => *n,
        Weight::Dynamic(f) => f(places),
        Weight::Inhibit => {
          if !place.is_empty() {
            return false;
          }
          consume.push(0);
          continue;
        },
      };
      let need = arc.threshold.unwrap_or(take);
      if place.len() < need {
        return false;
      }
      if let Some(guard) = &arc.guard {
        if !guard(place) {
          return false;
        }
      }
      if need > 0 {
        if let Some(ts) = place.ts_at(need - 1) {
          enable_ts = enable_ts.max(ts);
        }
      }
      consume.push(take);
    }

    let enable_time = enable_ts.max(self.pipeline_ready_time);
    let maturation = enable_time + (self.delay)(places);
    self.pipeline_ready_time = match self.pipeline_offset {
      Some(offset) => enable_time + offset,
      None => maturation,
    };
    self.maturation_time = Some(maturation);
    self.consume = consume;
    true
  }

  /// Fire if matured at `time`: produce outputs stamped with the maturation
  /// time, then consume inputs in declaration order.
  ///
  /// Panics if an input place no longer holds the tokens counted at enable
  /// time; that is a net definition bug.
  pub(crate) fn fire(&mut self, time: u64, places: &mut PlaceSet<P>) -> bool {
    let Some(maturation) = self.maturation_time else {
      return false;
    };
    if time < maturation {
      return false;
    }

    for arc in self.outputs.iter_mut() {
      let payloads = (arc.produce)(places);
      let place = &mut places[arc.place];
      for payload in payloads {
        place.push(Token::new(maturation, payload));
      }
    }

    for (arc, count) in self.inputs.iter().zip(self.consume.drain(..)) {
      let place = &mut places[arc.place];
      for _ in 0..count {
        if place.pop().is_none() {
          panic!("transition {}: place {} is out of tokens", self.id, place.id());
        }
      }
    }

    self.maturation_time = None;
    self.fire_count += 1;
    true
  }
}
