//! Server-rendered HTML for the site's pages.

use serde::Deserialize;

use crate::upload::{UploadResult, FILE_FIELD};

/// Flash message carried in a redirect's query string.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct Flash {
    pub error: Option<String>,
    pub success: Option<String>,
}

impl Flash {
    fn render(&self) -> String {
        let mut html = String::new();
        if let Some(msg) = &self.error {
            html.push_str(&format!(r#"<p class="flash error">{}</p>"#, escape_html(msg)));
        }
        if let Some(msg) = &self.success {
            html.push_str(&format!(r#"<p class="flash success">{}</p>"#, escape_html(msg)));
        }
        html
    }
}

/// Escapes the five HTML-significant characters.
pub fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

fn layout(title: &str, flash: &Flash, body: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
  <meta charset="utf-8">
  <title>{title}</title>
</head>
<body>
  <nav>
    <a href="/">Home</a>
    <a href="/segmentation">Segmentation</a>
    <a href="/about-us">About us</a>
    <a href="/sign-in">Sign in</a>
    <a href="/sign-up">Sign up</a>
  </nav>
  {flash}
  <main>
{body}
  </main>
</body>
</html>
"#,
        title = escape_html(title),
        flash = flash.render(),
        body = body,
    )
}

pub fn index() -> String {
    layout(
        "GeoSeg",
        &Flash::default(),
        r#"    <h1>Satellite image segmentation</h1>
    <p>Upload a GeoTIFF to segment it and locate the scene.</p>
    <a href="/segmentation">Start segmenting</a>"#,
    )
}

pub fn about() -> String {
    layout(
        "About us",
        &Flash::default(),
        r#"    <h1>About us</h1>
    <p>GeoSeg segments georeferenced satellite rasters with a promptless
    segmentation model and reports the geographic center of each scene.</p>"#,
    )
}

pub fn segmentation(flash: &Flash) -> String {
    let body = format!(
        r#"    <h1>Segment a scene</h1>
    <form action="/upload" method="post" enctype="multipart/form-data">
      <input type="file" name="{field}" accept=".tif,.tiff">
      <button type="submit">Upload</button>
    </form>"#,
        field = FILE_FIELD,
    );
    layout("Segmentation", flash, &body)
}

pub fn sign_in(flash: &Flash) -> String {
    layout(
        "Sign in",
        flash,
        r#"    <h1>Sign in</h1>
    <form action="/sign-in" method="post">
      <input type="email" name="email" placeholder="Email">
      <input type="password" name="password" placeholder="Password">
      <button type="submit">Sign in</button>
    </form>"#,
    )
}

pub fn sign_up(flash: &Flash) -> String {
    layout(
        "Sign up",
        flash,
        r#"    <h1>Sign up</h1>
    <form action="/sign-up" method="post">
      <input type="text" name="first-name" placeholder="First name">
      <input type="text" name="last-name" placeholder="Last name">
      <input type="email" name="email" placeholder="Email">
      <input type="password" name="password" placeholder="Password">
      <input type="password" name="confirm-password" placeholder="Confirm password">
      <button type="submit">Sign up</button>
    </form>"#,
    )
}

pub fn upload_result(result: &UploadResult) -> String {
    let crs_note = if result.crs.is_geographic() {
        String::new()
    } else {
        format!(
            r#"<p class="warning">Coordinates are in {} and were not reprojected.</p>"#,
            escape_html(&result.crs.description())
        )
    };
    let body = format!(
        r#"    <h1>Segmentation results</h1>
    <figure>
      <img src="{original}" alt="Original image">
      <figcaption>Original</figcaption>
    </figure>
    <figure>
      <img src="{result}" alt="Segmented image">
      <figcaption>Segmentation ({masks} masks)</figcaption>
    </figure>
    <p>Latitude: <span id="latitude">{lat}</span></p>
    <p>Longitude: <span id="longitude">{lon}</span></p>
    {crs_note}"#,
        original = escape_html(&result.original_image),
        result = escape_html(&result.result_image),
        masks = result.mask_count,
        lat = result.latitude,
        lon = result.longitude,
        crs_note = crs_note,
    );
    layout("Segmentation results", &Flash::default(), &body)
}
