use rstest::rstest;
use vellum_markup::{TemplateNode, parse};

#[rstest]
#[case::misnested("<b><i>x</b></i>", "<b><i>x</i></b>")]
#[case::implied_paragraph_close("<p>one<p>two", "<p>one</p><p>two</p>")]
#[case::list_items("<ul><li>a<li>b</ul>", "<ul><li>a</li><li>b</li></ul>")]
#[case::stray_text_entities("a &lt; b &gt; c", "a &lt; b &gt; c")]
#[case::attribute_quotes("<span title='say \"hi\"'>x</span>", "<span title=\"say &quot;hi&quot;\">x</span>")]
#[case::doctype("<!DOCTYPE html><p>x</p>", "<p>x</p>")]
fn test_error_recovery(#[case] source: &str, #[case] expected: &str) {
    assert_eq!(parse(source).root.to_markup(), expected);
}

#[test]
fn test_script_content_stays_inside_its_element() {
    let parsed = parse("<script>if (a < b) { x() }</script><p>after</p>");
    let tags = parsed
        .root
        .children()
        .iter()
        .filter_map(TemplateNode::as_element)
        .map(|element| element.tag.as_str())
        .collect::<Vec<_>>();

    assert_eq!(tags, vec!["script", "p"]);
}

#[test]
fn test_descendants_visit_every_node() {
    let parsed = parse("<div><p>a<b>b</b></p><Bio /></div>");
    let count = parsed.root.descendants().count();

    assert_eq!(count, parsed.root.node_count());
    assert_eq!(parsed.root.text_content(), "ab");
}

#[test]
fn test_attribute_names_are_lowercased() {
    let parsed = parse("<PostList LIMIT=\"3\" OnClick=\"x()\"></PostList>");
    let element = parsed.root.children()[0].as_element().cloned().unwrap_or_default();

    assert_eq!(element.tag, "postlist");
    assert_eq!(element.attr("limit"), Some("3"));
    assert_eq!(element.attr("onclick"), Some("x()"));
}
