//! Rendering a [`MapDocument`] as a standalone Leaflet page or as GeoJSON

use crate::map::MapDocument;
use crate::popup::html_escape;
use crate::Result;

pub const PAGE_TITLE: &str = "Psychology of Climate Change - Prototype";

const LAYER_HINT: &str = "You can display country colours based on either the risk factor or the \
average outcome variable. You can select this from the layer control at the top-right of the map.";
const BUBBLE_HINT: &str = "To display more information on the selected outcome variable for a \
country, please select a risk factor and click on the bubble.";

/// Tile URL template and attribution for a named base map
pub fn tile_source(name: &str) -> (&'static str, &'static str) {
    match name {
        "CartoDB positron" => (
            "https://{s}.basemaps.cartocdn.com/light_all/{z}/{x}/{y}{r}.png",
            "&copy; OpenStreetMap contributors &copy; CARTO",
        ),
        _ => (
            "https://{s}.tile.openstreetmap.org/{z}/{x}/{y}.png",
            "&copy; OpenStreetMap contributors",
        ),
    }
}

const PAGE_TEMPLATE: &str = r#"<!doctype html>
<html lang="en">
<head>
<meta charset="UTF-8" />
<meta name="viewport" content="width=device-width, initial-scale=1.0" />
<title>@@TITLE@@</title>
<link rel="stylesheet" href="https://unpkg.com/leaflet@1.9.4/dist/leaflet.css" />
<style>
  body { margin: 0; font-family: system-ui, -apple-system, 'Segoe UI', sans-serif; }
  header { padding: 12px 16px 4px 16px; }
  header h1 { margin: 0 0 6px 0; font-size: 22px; }
  header p { margin: 2px 0; font-size: 13px; color: #444; }
  #map { height: calc(100vh - 120px); }
  .legend { background: #fff; padding: 6px 8px; font-size: 11px; border-radius: 4px; box-shadow: 0 0 6px rgba(0,0,0,0.2); }
  .legend .title { font-weight: 600; margin-bottom: 4px; }
  .legend .swatch { display: inline-block; width: 18px; height: 10px; margin-right: 4px; }
</style>
</head>
<body>
<header>
  <h1>@@TITLE@@</h1>
  @@CAPTIONS@@
</header>
<div id="map"></div>
<script type="application/json" id="map-document">@@DOCUMENT@@</script>
<script src="https://unpkg.com/leaflet@1.9.4/dist/leaflet.js"></script>
<script>
const doc = JSON.parse(document.getElementById('map-document').textContent);
const map = L.map('map');
L.tileLayer('@@TILE_URL@@', {
    attribution: '@@TILE_ATTRIBUTION@@',
    subdomains: 'abcd',
    maxZoom: 19,
}).addTo(map);

const ch = doc.choropleth;
const choropleth = L.geoJSON(ch.features, {
    style: f => ({
        fillColor: f.properties.fill_color,
        fillOpacity: ch.fill_opacity,
        opacity: ch.line_opacity,
        weight: 1,
    }),
}).addTo(map);

if (ch.scale) {
    const legend = L.control({ position: 'bottomright' });
    legend.onAdd = () => {
        const div = L.DomUtil.create('div', 'legend');
        const rows = ch.scale.colors.map((c, i) =>
            `<div><span class="swatch" style="background:${c}"></span>${ch.scale.edges[i].toFixed(2)} – ${ch.scale.edges[i + 1].toFixed(2)}</div>`);
        const title = document.createElement('div');
        title.className = 'title';
        title.textContent = ch.legend_name;
        div.appendChild(title);
        div.insertAdjacentHTML('beforeend', rows.join(''));
        return div;
    };
    legend.addTo(map);
}

let bubbles = null;
if (doc.bubbles) {
    const b = doc.bubbles;
    bubbles = L.featureGroup(b.markers.map(m =>
        L.circleMarker(m.location, {
            radius: m.radius,
            fill: true,
            fillColor: b.fill_color,
            fillOpacity: b.fill_opacity,
            stroke: false,
        }).bindPopup(m.popup_html, { maxWidth: b.popup_max_width })
    )).addTo(map);
}

if (doc.layer_control && bubbles) {
    const overlays = {};
    overlays[ch.name] = choropleth;
    overlays[doc.bubbles.name] = bubbles;
    L.control.layers(null, overlays, { collapsed: false }).addTo(map);
}

const v = doc.viewport;
if (v.mode === 'fit') {
    map.fitBounds(v.bounds);
} else {
    map.setView(v.center, v.zoom);
}
</script>
</body>
</html>
"#;

/// JSON safe to place inside a `<script>` element
fn script_json(doc: &MapDocument) -> Result<String> {
    Ok(serde_json::to_string(doc)?.replace("</", "<\\/"))
}

/// Standalone HTML page drawing the map with Leaflet
pub fn to_html(doc: &MapDocument) -> Result<String> {
    let (tile_url, attribution) = tile_source(&doc.tiles);

    let mut captions = String::new();
    if doc.selection.risk_factor.is_some() {
        captions.push_str(&format!("<p>{}</p>", html_escape(LAYER_HINT)));
    }
    captions.push_str(&format!("<p>{}</p>", html_escape(BUBBLE_HINT)));

    Ok(PAGE_TEMPLATE
        .replace("@@TITLE@@", &html_escape(PAGE_TITLE))
        .replace("@@CAPTIONS@@", &captions)
        .replace("@@TILE_URL@@", tile_url)
        .replace("@@TILE_ATTRIBUTION@@", attribution)
        .replace("@@DOCUMENT@@", &script_json(doc)?))
}

/// Export the bubble layer as a GeoJSON FeatureCollection of points
pub fn bubbles_to_geojson(doc: &MapDocument) -> serde_json::Value {
    let features: Vec<serde_json::Value> = doc
        .bubbles
        .iter()
        .flat_map(|layer| layer.markers.iter().map(move |m| (layer, m)))
        .map(|(layer, m)| {
            serde_json::json!({
                "type": "Feature",
                "id": m.country_code,
                "geometry": {
                    "type": "Point",
                    "coordinates": [m.location[1], m.location[0]]
                },
                "properties": {
                    "country_code": m.country_code,
                    "country": m.popup.country_label,
                    "risk_factor": layer.risk_factor,
                    "risk_value": m.value,
                    "radius": m.radius,
                    "outcome": doc.choropleth.outcome,
                    "outcome_mean": m.popup.mean_text,
                    "ci": m.popup.ci_text,
                    "p_value": m.popup.p_text,
                    "best_intervention": m.popup.best_label
                }
            })
        })
        .collect();

    serde_json::json!({
        "type": "FeatureCollection",
        "features": features,
        "metadata": {
            "selection": doc.selection,
            "generated_at": doc.generated_at
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::map::tests::sample_dataset;
    use crate::map::{build_map, MapSelection};
    use crate::RiskFactor;

    fn selection(risk: Option<RiskFactor>) -> MapSelection {
        MapSelection {
            risk_factor: risk,
            ..MapSelection::default()
        }
    }

    #[test]
    fn test_html_embeds_document() {
        let doc = build_map(&sample_dataset(), &selection(Some(RiskFactor::RiskFactor1)));
        let html = to_html(&doc).unwrap();

        assert!(html.contains(PAGE_TITLE));
        assert!(html.contains("basemaps.cartocdn.com/light_all"));
        assert!(html.contains("\"layer_control\":true"));
        assert!(html.contains("layer control at the top-right"));
        assert!(!html.contains("@@"));
    }

    #[test]
    fn test_html_without_risk_factor() {
        let doc = build_map(&sample_dataset(), &selection(None));
        let html = to_html(&doc).unwrap();

        assert!(html.contains("\"bubbles\":null"));
        assert!(html.contains("\"layer_control\":false"));
        assert!(!html.contains("layer control at the top-right"));
    }

    #[test]
    fn test_script_json_cannot_close_tag() {
        let mut doc = build_map(&sample_dataset(), &selection(Some(RiskFactor::RiskFactor1)));
        doc.generated_at = "</script><b>".to_string();
        let json = script_json(&doc).unwrap();
        assert!(!json.contains("</script>"));
    }

    #[test]
    fn test_bubble_geojson() {
        let doc = build_map(&sample_dataset(), &selection(Some(RiskFactor::RiskFactor1)));
        let geojson = bubbles_to_geojson(&doc);

        let features = geojson["features"].as_array().unwrap();
        // URY, BOL and DEU have both coordinates and a risk value
        assert_eq!(features.len(), 3);
        let ury = features.iter().find(|f| f["id"] == "URY").unwrap();
        assert_eq!(ury["geometry"]["coordinates"][0], -55.8);
        assert_eq!(ury["properties"]["best_intervention"], "Dynamic Social Norms");
        assert_eq!(ury["properties"]["risk_factor"], "risk_factor_1");

        let empty = bubbles_to_geojson(&build_map(&sample_dataset(), &selection(None)));
        assert!(empty["features"].as_array().unwrap().is_empty());
    }
}
