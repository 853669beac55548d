//! Fragmentation invariance: how text is chunked into layout objects must
//! not change the transformed text, the offset mapping, or the computed
//! break opportunities.

use textflow::{
  Document, MetricsShaper, ObjectId, Scanner, StyleContext, TextRunContext,
};

/// Scans `text` split into objects at the given char positions (each piece
/// its own content node, identical style) and returns the resulting run's
/// transformed text and break-before bits.
fn scan_split(text: &str, splits: &[usize]) -> (String, Vec<bool>) {
  let chars: Vec<char> = text.chars().collect();
  let mut doc = Document::new();
  let mut ctx = TextRunContext::new();
  let shaper = MetricsShaper::new(10.0, 5.0);
  let style = StyleContext::default().shared();

  let mut objects: Vec<ObjectId> = Vec::new();
  let mut boundaries = vec![0];
  boundaries.extend_from_slice(splits);
  boundaries.push(chars.len());
  for pair in boundaries.windows(2) {
    let (start, end) = (pair[0], pair[1]);
    if start == end {
      continue;
    }
    let piece: String = chars[start..end].iter().collect();
    let content = doc.add_content(&piece);
    objects.push(doc.add_text_object(content, 0..end - start, style.clone()));
  }
  let line = doc.add_container(style, true, objects.clone());
  let mut scanner = Scanner::new(&mut doc, &mut ctx, &shaper);
  scanner.scan_line(line).unwrap();

  let run_id = doc
    .object(objects[0])
    .as_text()
    .unwrap()
    .run
    .expect("no run built");
  let run = ctx.run(run_id).unwrap();
  // All objects must share the one run for the comparison to make sense.
  for &object in &objects {
    assert_eq!(doc.object(object).as_text().unwrap().run, Some(run_id));
  }
  let breaks: Vec<bool> = (0..run.len()).map(|t| run.can_break_before(t)).collect();
  (run.text().to_string(), breaks)
}

#[test]
fn break_opportunities_do_not_depend_on_fragmentation() {
  let samples = [
    "The quick brown fox",
    "  leading and trailing  ",
    "mixed 日本語 and latin",
    "co\u{00AD}op breaks\u{200B}here",
  ];
  for text in samples {
    let n = text.chars().count();
    let (whole_text, whole_breaks) = scan_split(text, &[]);
    for i in 1..n {
      let (t, b) = scan_split(text, &[i]);
      assert_eq!(t, whole_text, "{text:?} split at {i}");
      assert_eq!(b, whole_breaks, "{text:?} split at {i}");
    }
    // A few three-way splits across interesting boundaries.
    for i in 1..n.min(6) {
      for j in (i + 1)..n {
        let (t, b) = scan_split(text, &[i, j]);
        assert_eq!(t, whole_text, "{text:?} split at {i},{j}");
        assert_eq!(b, whole_breaks, "{text:?} split at {i},{j}");
      }
    }
  }
}

#[test]
fn whitespace_collapse_is_idempotent_through_the_scanner() {
  let (once, _) = scan_split("a  b\t\tc   d", &[]);
  let (twice, _) = scan_split(&once, &[]);
  assert_eq!(once, twice);
}
