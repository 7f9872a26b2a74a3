//! End-to-end behavior of the image service with a stub segmentation model

mod common;

use common::{
    assert_close, decode_output, image_base64, jpeg_base64, png_base64, stub_service,
    StubFactory, SUBJECT,
};
use image::{GenericImageView, ImageFormat, Rgb};
use imagenerd_bgremove::{
    BackgroundSource, CompositeOutput, ImageRequest, ImageResponse, OutputFormat, RemovalConfig,
};

fn match_input_config() -> RemovalConfig {
    RemovalConfig::builder()
        .composite_output(CompositeOutput::MatchInput)
        .build()
        .unwrap()
}

#[test]
fn removal_keeps_subject_and_clears_background() {
    let factory = StubFactory::default();
    let service = stub_service(RemovalConfig::default(), &factory);

    let output = service.remove_background(&png_base64(40, 24)).unwrap();
    assert_eq!(output.format, OutputFormat::Png);

    let image = decode_output(&output.image_base64, ImageFormat::Png);
    assert_eq!(image.dimensions(), (40, 24));
    assert!(image.color().has_alpha());

    let rgba = image.to_rgba8();
    assert!(rgba.get_pixel(1, 12)[3] > 245);
    assert_eq!(rgba.get_pixel(38, 12)[3], 0);
    assert_eq!(factory.created(), 1);
}

#[test]
fn solid_color_replaces_background_exactly() {
    let factory = StubFactory::default();
    let service = stub_service(match_input_config(), &factory);

    let output = service
        .change_background(&png_base64(40, 40), &BackgroundSource::Solid("255,0,0".to_string()))
        .unwrap();
    assert_eq!(output.format, OutputFormat::Png);

    let image = decode_output(&output.image_base64, ImageFormat::Png);
    assert!(!image.color().has_alpha());
    let rgb = image.to_rgb8();
    assert_eq!(*rgb.get_pixel(38, 20), Rgb([255, 0, 0]));
    assert_close(*rgb.get_pixel(1, 20), SUBJECT, 3);
}

#[test]
fn composites_default_to_jpeg() {
    let factory = StubFactory::default();
    let service = stub_service(RemovalConfig::default(), &factory);

    let output = service
        .change_background(&png_base64(32, 32), &BackgroundSource::Solid("0,255,0".to_string()))
        .unwrap();
    assert_eq!(output.format, OutputFormat::Jpeg);

    let image = decode_output(&output.image_base64, ImageFormat::Jpeg);
    assert!(!image.color().has_alpha());
    assert_close(*image.to_rgb8().get_pixel(30, 16), Rgb([0, 255, 0]), 20);
}

#[test]
fn jpeg_input_stays_jpeg_when_matching_input() {
    let factory = StubFactory::default();
    let service = stub_service(match_input_config(), &factory);

    let output = service
        .change_background(&jpeg_base64(24, 24), &BackgroundSource::Solid("9,9,9".to_string()))
        .unwrap();
    assert_eq!(output.format, OutputFormat::Jpeg);
    decode_output(&output.image_base64, ImageFormat::Jpeg);
}

#[test]
fn background_image_is_stretched_to_input() {
    let factory = StubFactory::default();
    let service = stub_service(match_input_config(), &factory);
    let background = image_base64(5, 3, Rgb([200, 180, 20]), ImageFormat::Png);

    let output = service
        .change_background(&png_base64(60, 30), &BackgroundSource::Image(background))
        .unwrap();

    let image = decode_output(&output.image_base64, ImageFormat::Png);
    assert_eq!(image.dimensions(), (60, 30));
    assert_close(*image.to_rgb8().get_pixel(58, 15), Rgb([200, 180, 20]), 1);
}

#[test]
fn background_image_wins_over_solid_color() {
    let request = ImageRequest {
        image_base64: Some(png_base64(8, 8)),
        new_background_image_base64: Some(png_base64(2, 2)),
        solid_color: Some("1,2,3".to_string()),
        ..ImageRequest::default()
    };
    assert!(matches!(request.background().unwrap(), BackgroundSource::Image(_)));
}

#[test]
fn url_safe_unpadded_payload_matches_standard() {
    let factory = StubFactory::default();
    let service = stub_service(RemovalConfig::default(), &factory);

    // Noise makes '+', '/' and padding show up in the encoding
    let noisy = image::RgbImage::from_fn(17, 13, |x, y| {
        Rgb([(x * 37 + y * 11) as u8, (x * y * 7) as u8, ((x ^ y) * 19) as u8])
    });
    let mut buffer = std::io::Cursor::new(Vec::new());
    noisy.write_to(&mut buffer, ImageFormat::Png).unwrap();
    let standard = imagenerd_bgremove::services::encode_base64(buffer.get_ref());
    let url_safe = standard
        .replace('+', "-")
        .replace('/', "_")
        .trim_end_matches('=')
        .to_string();

    let from_standard = service.remove_background(&standard).unwrap();
    let from_url_safe = service.remove_background(&format!("\n{url_safe}  ")).unwrap();
    assert_eq!(from_standard, from_url_safe);
}

#[test]
fn oversized_input_is_downscaled() {
    let factory = StubFactory::default();
    let config = RemovalConfig::builder()
        .max_dimension(Some(100))
        .build()
        .unwrap();
    let service = stub_service(config, &factory);

    let output = service.remove_background(&png_base64(300, 150)).unwrap();
    let image = decode_output(&output.image_base64, ImageFormat::Png);
    assert_eq!(image.dimensions(), (100, 50));

    let output = service.remove_background(&png_base64(90, 60)).unwrap();
    let image = decode_output(&output.image_base64, ImageFormat::Png);
    assert_eq!(image.dimensions(), (90, 60));
}

#[test]
fn malformed_payload_fails_before_model_load() {
    let factory = StubFactory::default();
    let service = stub_service(RemovalConfig::default(), &factory);

    let err = service.remove_background("%%% not an image %%%").unwrap_err();
    assert!(err.is_client_error());
    assert!(err.to_string().starts_with("Failed to decode image"));
    assert_eq!(factory.created(), 0);
    assert!(!service.model_loaded());
}

#[test]
fn bad_color_fails_before_inference() {
    let factory = StubFactory::default();
    let service = stub_service(RemovalConfig::default(), &factory);

    let err = service
        .change_background(&png_base64(8, 8), &BackgroundSource::Solid("red".to_string()))
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        "Invalid solid_color 'red': expected \"R,G,B\" with values 0-255"
    );
    assert_eq!(factory.inferences(), 0);
}

#[test]
fn inference_failure_is_a_server_error() {
    let factory = StubFactory::failing();
    let service = stub_service(RemovalConfig::default(), &factory);

    let err = service.remove_background(&png_base64(8, 8)).unwrap_err();
    assert!(!err.is_client_error());
    assert!(err.to_string().contains("stub inference failure"));
}

#[test]
fn model_loads_once_across_requests() {
    let factory = StubFactory::default();
    let service = stub_service(RemovalConfig::default(), &factory);

    for _ in 0..3 {
        service.remove_background(&png_base64(10, 10)).unwrap();
    }
    assert_eq!(factory.created(), 1);
    assert_eq!(factory.inferences(), 3);
}

#[test]
fn stdin_requests_produce_envelopes() {
    let factory = StubFactory::default();
    let service = stub_service(RemovalConfig::default(), &factory);

    let request: ImageRequest = serde_json::from_value(serde_json::json!({
        "operation": "change_background",
        "image_base64": png_base64(12, 12),
        "solid_color": "10,20,30",
    }))
    .unwrap();
    let response = service.handle(&request);
    let json = serde_json::to_value(&response).unwrap();
    assert_eq!(json["success"], true);
    assert_eq!(json["format"], "jpeg");
    assert!(json.get("error").is_none());

    let missing = service.handle(&ImageRequest {
        operation: Some("remove_background".to_string()),
        ..ImageRequest::default()
    });
    assert_eq!(missing, ImageResponse::failure("image_base64 is required"));

    let unknown = service.handle(&ImageRequest {
        operation: Some("sharpen".to_string()),
        image_base64: Some(png_base64(4, 4)),
        ..ImageRequest::default()
    });
    assert_eq!(unknown.error.as_deref(), Some("Unknown operation"));

    let no_background = service.handle(&ImageRequest {
        operation: Some("change_background".to_string()),
        image_base64: Some(png_base64(4, 4)),
        ..ImageRequest::default()
    });
    assert_eq!(
        no_background.error.as_deref(),
        Some("Either new_background_image_base64 or solid_color must be provided")
    );
}

#[test]
fn failure_envelope_omits_absent_fields() {
    let json = serde_json::to_string(&ImageResponse::failure("boom")).unwrap();
    assert_eq!(json, r#"{"success":false,"error":"boom"}"#);
}
