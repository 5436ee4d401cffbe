use std::ops::{Index, IndexMut};

use rayon::prelude::*;

/// Row-major 2D buffer addressed as `(x, y)` = `(column, row)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Buffer2<T> {
    pixels: Vec<T>,
    width: usize,
    height: usize,
}

impl<T> Buffer2<T> {
    pub fn new(width: usize, height: usize, pixels: Vec<T>) -> Self {
        assert_eq!(
            pixels.len(),
            width * height,
            "pixels length must equal width * height"
        );
        Self {
            pixels,
            width,
            height,
        }
    }

    pub fn from_fn<F>(width: usize, height: usize, mut f: F) -> Self
    where
        F: FnMut(usize, usize) -> T,
    {
        let mut pixels = Vec::with_capacity(width * height);
        for y in 0..height {
            for x in 0..width {
                pixels.push(f(x, y));
            }
        }
        Self {
            pixels,
            width,
            height,
        }
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize) -> &T {
        debug_assert!(x < self.width && y < self.height);
        &self.pixels[y * self.width + x]
    }

    #[inline]
    pub fn get_mut(&mut self, x: usize, y: usize) -> &mut T {
        debug_assert!(x < self.width && y < self.height);
        &mut self.pixels[y * self.width + x]
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.pixels.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.pixels.is_empty()
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.width
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.height
    }

    /// `(width, height)`.
    #[inline]
    pub fn dimensions(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    #[inline]
    pub fn pixels(&self) -> &[T] {
        &self.pixels
    }

    #[inline]
    pub fn pixels_mut(&mut self) -> &mut [T] {
        &mut self.pixels
    }

    #[inline]
    pub fn row(&self, y: usize) -> &[T] {
        &self.pixels[y * self.width..(y + 1) * self.width]
    }

    #[inline]
    pub fn row_mut(&mut self, y: usize) -> &mut [T] {
        &mut self.pixels[y * self.width..(y + 1) * self.width]
    }

    #[inline]
    pub fn into_vec(self) -> Vec<T> {
        self.pixels
    }
}

impl<T: Copy> Buffer2<T> {
    pub fn map<U, F>(&self, f: F) -> Buffer2<U>
    where
        F: Fn(T) -> U,
    {
        Buffer2 {
            pixels: self.pixels.iter().map(|&v| f(v)).collect(),
            width: self.width,
            height: self.height,
        }
    }

    /// Mirrors rows top-to-bottom.
    pub fn flip_vertical(&self) -> Self {
        let mut pixels = Vec::with_capacity(self.pixels.len());
        for y in (0..self.height).rev() {
            pixels.extend_from_slice(self.row(y));
        }
        Self {
            pixels,
            width: self.width,
            height: self.height,
        }
    }

    /// Mirrors columns left-to-right.
    pub fn flip_horizontal(&self) -> Self {
        let mut pixels = Vec::with_capacity(self.pixels.len());
        for y in 0..self.height {
            pixels.extend(self.row(y).iter().rev());
        }
        Self {
            pixels,
            width: self.width,
            height: self.height,
        }
    }

    /// Rotates counter-clockwise by `quarter_turns * 90` degrees.
    /// Odd turn counts swap width and height.
    pub fn rotate_ccw(&self, quarter_turns: u32) -> Self {
        let (w, h) = (self.width, self.height);
        match quarter_turns % 4 {
            0 => self.clone(),
            1 => Self::from_fn(h, w, |x, y| *self.get(w - 1 - y, x)),
            2 => Self::from_fn(w, h, |x, y| *self.get(w - 1 - x, h - 1 - y)),
            _ => Self::from_fn(h, w, |x, y| *self.get(y, h - 1 - x)),
        }
    }

    /// Copies the `width` x `height` block whose top-left corner is `(x0, y0)`.
    pub fn block(&self, x0: usize, y0: usize, width: usize, height: usize) -> Self {
        assert!(x0 + width <= self.width && y0 + height <= self.height);
        let mut pixels = Vec::with_capacity(width * height);
        for y in y0..y0 + height {
            pixels.extend_from_slice(&self.row(y)[x0..x0 + width]);
        }
        Self {
            pixels,
            width,
            height,
        }
    }

    /// Writes `src` with its top-left corner at `(x0, y0)`.
    pub fn paste(&mut self, src: &Self, x0: usize, y0: usize) {
        assert!(x0 + src.width <= self.width && y0 + src.height <= self.height);
        for y in 0..src.height {
            self.row_mut(y0 + y)[x0..x0 + src.width].copy_from_slice(src.row(y));
        }
    }
}

impl<T: Copy + PartialOrd + Send + Sync> Buffer2<T> {
    /// Elementwise maximum with `other`, stored in `self`.
    pub fn max_assign(&mut self, other: &Self) {
        assert_eq!(self.width, other.width, "width mismatch");
        assert_eq!(self.height, other.height, "height mismatch");
        self.pixels
            .par_iter_mut()
            .zip(other.pixels.par_iter())
            .for_each(|(a, &b)| {
                if b > *a {
                    *a = b;
                }
            });
    }
}

impl<T: Default + Clone> Buffer2<T> {
    pub fn new_default(width: usize, height: usize) -> Self {
        Self {
            pixels: vec![T::default(); width * height],
            width,
            height,
        }
    }
}

impl<T: Clone> Buffer2<T> {
    pub fn new_filled(width: usize, height: usize, value: T) -> Self {
        Self {
            pixels: vec![value; width * height],
            width,
            height,
        }
    }
}

impl<T> Index<(usize, usize)> for Buffer2<T> {
    type Output = T;

    #[inline]
    fn index(&self, (x, y): (usize, usize)) -> &Self::Output {
        &self.pixels[y * self.width + x]
    }
}

impl<T> IndexMut<(usize, usize)> for Buffer2<T> {
    #[inline]
    fn index_mut(&mut self, (x, y): (usize, usize)) -> &mut Self::Output {
        &mut self.pixels[y * self.width + x]
    }
}
