// Matcher behaviour on realistic frames with the default ZNCC strategy

use image::{imageops, Rgba, RgbaImage};
use rand::{Rng, SeedableRng};
use rand::rngs::StdRng;

use spellcast::matcher::MatchMethod;
use spellcast::{Frame, Matcher, Template, TemplateSet};

fn noise(rng: &mut StdRng, width: u32, height: u32) -> RgbaImage {
    RgbaImage::from_fn(width, height, |_, _| {
        Rgba([rng.gen(), rng.gen(), rng.gen(), 255])
    })
}

#[test]
fn test_frame_identical_to_template_scores_one() {
    let mut rng = StdRng::seed_from_u64(11);
    let icon = noise(&mut rng, 40, 40);

    let set = TemplateSet::new(vec![Template::new("N5", icon.clone(), 0.8).unwrap()]);
    let result = Matcher::default().match_frame(&Frame::new(icon), &set);

    assert_eq!(result.template.as_deref(), Some("N5"));
    assert_eq!(result.confidence, 1.0);
    assert_eq!(result.location, Some((0, 0)));
}

#[test]
fn test_icon_is_found_where_it_was_drawn() {
    let mut rng = StdRng::seed_from_u64(23);
    let region = noise(&mut rng, 100, 40);
    let icon = imageops::crop_imm(&region, 37, 6, 24, 24).to_image();
    let other = noise(&mut rng, 24, 24);

    let set = TemplateSet::new(vec![
        Template::new("C1", other, 0.8).unwrap(),
        Template::new("N5", icon, 0.8).unwrap(),
    ]);
    let result = Matcher::default().match_frame(&Frame::new(region), &set);

    assert_eq!(result.template.as_deref(), Some("N5"));
    assert_eq!(result.confidence, 1.0);
    assert_eq!(result.location, Some((37, 6)));
    assert!(result.scores[0].score < 0.8);
}

#[test]
fn test_matching_is_deterministic() {
    let mut rng = StdRng::seed_from_u64(5);
    let templates: Vec<Template> = (0..4)
        .map(|i| Template::new(format!("T{}", i), noise(&mut rng, 16, 16), 0.5).unwrap())
        .collect();
    let set = TemplateSet::new(templates);
    let matcher = Matcher::default();

    for _ in 0..5 {
        let frame = Frame::new(noise(&mut rng, 64, 32));
        let first = matcher.match_frame(&frame, &set);
        let second = matcher.match_frame(&frame, &set);
        assert_eq!(first, second);
        assert!(first.scores.iter().all(|s| (0.0..=1.0).contains(&s.score)));
    }
}

#[test]
fn test_blank_region_matches_nothing() {
    let mut rng = StdRng::seed_from_u64(3);
    let set = TemplateSet::new(vec![Template::new("N5", noise(&mut rng, 20, 20), 0.8).unwrap()]);
    let blank = Frame::new(RgbaImage::from_pixel(100, 40, Rgba([30, 30, 30, 255])));

    let result = Matcher::default().match_frame(&blank, &set);
    assert!(!result.is_match());
    assert_eq!(result.confidence, 0.0);
}

/// 40x40 gray ramp, brightened by `lift`
fn ramp(lift: u8) -> RgbaImage {
    RgbaImage::from_fn(40, 40, |x, y| {
        let v = (x * 3 + y) as u8 + lift;
        Rgba([v, v, v, 255])
    })
}

#[test]
fn test_absdiff_is_brightness_sensitive_where_zncc_is_not() {
    let set = TemplateSet::new(vec![Template::new("N5", ramp(0), 0.8).unwrap()]);
    let brighter = Frame::new(ramp(60));

    let zncc = Matcher::from_method(MatchMethod::Zncc).match_frame(&brighter, &set);
    assert_eq!(zncc.template.as_deref(), Some("N5"));
    assert_eq!(zncc.confidence, 1.0);

    // Every pixel is off by 60: 1 - 60/255
    let absdiff = Matcher::from_method(MatchMethod::AbsDiff);
    let result = absdiff.match_frame(&brighter, &set);
    assert!(!result.is_match());
    assert!((result.confidence - (1.0 - 60.0 / 255.0)).abs() < 1e-4);

    let exact = absdiff.match_frame(&Frame::new(ramp(0)), &set);
    assert_eq!(exact.template.as_deref(), Some("N5"));
    assert_eq!(exact.confidence, 1.0);
}
