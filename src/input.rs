//! Pointer and touch tracking. Handlers only touch pointer records; the frame
//! loop drains the resulting splats once per frame.

use glam::{Vec2, Vec3};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PointerId {
    Mouse,
    Touch(u64),
}

#[derive(Debug, Clone, PartialEq)]
pub struct PointerState {
    pub id: PointerId,
    pub texcoord: Vec2,
    pub prev_texcoord: Vec2,
    /// Aspect-corrected movement since the previous sample.
    pub delta: Vec2,
    pub down: bool,
    /// Set by a non-zero move, cleared when the frame consumes the splat.
    pub moved: bool,
    pub color: Vec3,
    sampled: bool,
}

impl PointerState {
    /// A lifted touch with no splat left to deliver. The mouse record is
    /// never handed to another pointer.
    fn is_free(&self) -> bool {
        matches!(self.id, PointerId::Touch(_)) && !self.down && !self.moved
    }

    fn new(id: PointerId, color: Vec3) -> Self {
        Self {
            id,
            texcoord: Vec2::ZERO,
            prev_texcoord: Vec2::ZERO,
            delta: Vec2::ZERO,
            down: false,
            moved: false,
            color,
            sampled: false,
        }
    }
}

/// Force and colour injected at a texture-space point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Splat {
    pub point: Vec2,
    pub force: Vec2,
    pub color: Vec3,
}

pub struct InputRouter {
    pointers: Vec<PointerState>,
    pending: Vec<Splat>,
    rng: StdRng,
}

impl Default for InputRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl InputRouter {
    pub fn new() -> Self {
        Self::from_rng(StdRng::from_entropy())
    }

    pub fn with_seed(seed: u64) -> Self {
        Self::from_rng(StdRng::seed_from_u64(seed))
    }

    fn from_rng(mut rng: StdRng) -> Self {
        let mouse = PointerState::new(PointerId::Mouse, generate_color(&mut rng));
        Self {
            pointers: vec![mouse],
            pending: Vec::new(),
            rng,
        }
    }

    pub fn pointers(&self) -> &[PointerState] {
        &self.pointers
    }

    pub fn pointer(&self, id: PointerId) -> Option<&PointerState> {
        self.pointers.iter().find(|pointer| pointer.id == id)
    }

    /// Splats queued by clicks and bursts, not yet consumed.
    pub fn pending(&self) -> &[Splat] {
        &self.pending
    }

    pub fn pointer_down(&mut self, id: PointerId, x: f32, y: f32, width: u32, height: u32) {
        let texcoord = texcoord(x, y, width, height);
        let color = generate_color(&mut self.rng);
        let index = match self.pointers.iter().position(|pointer| pointer.id == id) {
            Some(index) => index,
            None => match self.pointers.iter().position(PointerState::is_free) {
                Some(index) => {
                    log::trace!("pointer {id:?} reuses {:?}", self.pointers[index].id);
                    self.pointers[index].id = id;
                    index
                }
                None => {
                    self.pointers.push(PointerState::new(id, color));
                    self.pointers.len() - 1
                }
            },
        };

        let pointer = &mut self.pointers[index];
        pointer.texcoord = texcoord;
        pointer.prev_texcoord = texcoord;
        pointer.delta = Vec2::ZERO;
        pointer.down = true;
        pointer.moved = false;
        pointer.color = color;
        pointer.sampled = true;
        log::trace!("pointer {id:?} down at {texcoord}");

        let click = Splat {
            point: texcoord,
            force: Vec2::new(
                10.0 * (self.rng.gen::<f32>() - 0.5),
                30.0 * (self.rng.gen::<f32>() - 0.5),
            ),
            color: color * 10.0,
        };
        self.pending.push(click);
    }

    pub fn pointer_move(&mut self, id: PointerId, x: f32, y: f32, width: u32, height: u32) {
        let Some(pointer) = self.pointers.iter_mut().find(|pointer| pointer.id == id) else {
            log::trace!("move for unknown pointer {id:?} ignored");
            return;
        };
        let texcoord = texcoord(x, y, width, height);
        if !pointer.sampled {
            pointer.texcoord = texcoord;
            pointer.prev_texcoord = texcoord;
            pointer.sampled = true;
            return;
        }

        let aspect_ratio = width.max(1) as f32 / height.max(1) as f32;
        pointer.prev_texcoord = pointer.texcoord;
        pointer.texcoord = texcoord;
        let raw = pointer.texcoord - pointer.prev_texcoord;
        pointer.delta = Vec2::new(
            correct_delta_x(raw.x, aspect_ratio),
            correct_delta_y(raw.y, aspect_ratio),
        );
        pointer.moved = pointer.delta != Vec2::ZERO;
    }

    pub fn pointer_up(&mut self, id: PointerId) {
        if let Some(pointer) = self.pointers.iter_mut().find(|pointer| pointer.id == id) {
            pointer.down = false;
        }
    }

    /// Queues `count` strong splats at random points.
    pub fn queue_random_splats(&mut self, count: usize) {
        for _ in 0..count {
            let color = generate_color(&mut self.rng) * 10.0;
            let point = Vec2::new(self.rng.gen(), self.rng.gen());
            let force = Vec2::new(
                1000.0 * (self.rng.gen::<f32>() - 0.5),
                1000.0 * (self.rng.gen::<f32>() - 0.5),
            );
            self.pending.push(Splat {
                point,
                force,
                color,
            });
        }
    }

    pub fn regenerate_colors(&mut self) {
        for pointer in &mut self.pointers {
            pointer.color = generate_color(&mut self.rng);
        }
    }

    /// Queued splats first, then one splat per moved pointer carrying its
    /// latest delta. Clears every `moved` flag.
    pub fn drain_splats(&mut self, splat_force: f32) -> Vec<Splat> {
        let mut splats = std::mem::take(&mut self.pending);
        for pointer in self.pointers.iter_mut().filter(|pointer| pointer.moved) {
            pointer.moved = false;
            splats.push(Splat {
                point: pointer.texcoord,
                force: pointer.delta * splat_force,
                color: pointer.color,
            });
        }
        splats
    }
}

fn texcoord(x: f32, y: f32, width: u32, height: u32) -> Vec2 {
    Vec2::new(x / width.max(1) as f32, y / height.max(1) as f32)
}

/// Shrinks horizontal movement on surfaces taller than wide.
pub fn correct_delta_x(delta: f32, aspect_ratio: f32) -> f32 {
    if aspect_ratio < 1.0 {
        delta * aspect_ratio
    } else {
        delta
    }
}

/// Shrinks vertical movement on surfaces wider than tall.
pub fn correct_delta_y(delta: f32, aspect_ratio: f32) -> f32 {
    if aspect_ratio > 1.0 {
        delta / aspect_ratio
    } else {
        delta
    }
}

/// Random fully saturated hue, dimmed.
pub fn generate_color(rng: &mut impl Rng) -> Vec3 {
    hsv_to_rgb(rng.gen(), 1.0, 1.0) * 0.15
}

fn hsv_to_rgb(h: f32, s: f32, v: f32) -> Vec3 {
    let i = (h * 6.0).floor();
    let f = h * 6.0 - i;
    let p = v * (1.0 - s);
    let q = v * (1.0 - f * s);
    let t = v * (1.0 - (1.0 - f) * s);
    match i as i32 % 6 {
        0 => Vec3::new(v, t, p),
        1 => Vec3::new(q, v, p),
        2 => Vec3::new(p, v, t),
        3 => Vec3::new(p, q, v),
        4 => Vec3::new(t, p, v),
        _ => Vec3::new(v, p, q),
    }
}

/// Wraps `value` into `[min, max)`.
pub fn wrap(value: f32, min: f32, max: f32) -> f32 {
    let range = max - min;
    if range == 0.0 {
        return min;
    }
    (value - min).rem_euclid(range) + min
}
