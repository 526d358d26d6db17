//! 检测框叠加绘制

use image::{Rgb, RgbImage};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;

use super::buffer::BufferedFrame;
use super::types::BBox;

pub const GREEN: Rgb<u8> = Rgb([0, 255, 0]);
pub const YELLOW: Rgb<u8> = Rgb([255, 255, 0]);
pub const RED: Rgb<u8> = Rgb([255, 0, 0]);

const THICKNESS: i32 = 2;

/// 区域框颜色: 0 个合格目标红色, 1 个黄色, 2 个及以上绿色
pub fn region_color(qualifying: usize) -> Rgb<u8> {
    match qualifying {
        0 => RED,
        1 => YELLOW,
        _ => GREEN,
    }
}

/// 绘制空心矩形, 自动裁剪到图像内
pub fn draw_box(img: &mut RgbImage, bbox: &BBox, color: Rgb<u8>) {
    let (w, h) = img.dimensions();
    let b = bbox.clamp(w as f32, h as f32);
    for i in 0..THICKNESS {
        let bw = b.width() as i32 - 2 * i;
        let bh = b.height() as i32 - 2 * i;
        if bw <= 0 || bh <= 0 {
            break;
        }
        let rect = Rect::at(b.xmin() as i32 + i, b.ymin() as i32 + i).of_size(bw as u32, bh as u32);
        draw_hollow_rect_mut(img, rect, color);
    }
}

/// 返回叠加了区域框与目标框的图像副本
pub fn render(frame: &BufferedFrame) -> RgbImage {
    let mut img = frame.image.clone();
    if let Some(region) = &frame.region {
        draw_box(&mut img, region, region_color(frame.qualifying_count()));
    }
    for subject in &frame.subjects {
        let color = if subject.qualifying { GREEN } else { RED };
        draw_box(&mut img, &subject.detection.bbox, color);
    }
    img
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::buffer::Subject;
    use crate::detection::types::Detection;

    #[test]
    fn test_render_draws_region_and_subjects() {
        let frame = BufferedFrame {
            capture_time: 0,
            image: RgbImage::new(40, 40),
            region: Some(BBox::new(0.0, 0.0, 40.0, 40.0)),
            subjects: vec![Subject {
                detection: Detection::new("fish", 0.9, BBox::new(10.0, 10.0, 10.0, 10.0)),
                qualifying: true,
            }],
        };
        let img = render(&frame);
        // 1 个合格目标 → 黄色区域框
        assert_eq!(*img.get_pixel(0, 0), YELLOW);
        assert_eq!(*img.get_pixel(10, 10), GREEN);
        assert_eq!(*img.get_pixel(30, 30), Rgb([0, 0, 0]));
        // 原图不变
        assert_eq!(*frame.image.get_pixel(0, 0), Rgb([0, 0, 0]));
    }

    #[test]
    fn test_box_outside_image_is_ignored() {
        let mut img = RgbImage::new(10, 10);
        draw_box(&mut img, &BBox::new(50.0, 50.0, 5.0, 5.0), RED);
        assert!(img.pixels().all(|p| *p == Rgb([0, 0, 0])));
    }
}
