use cardamome::{CompileError, CompileOptions, Context, Mode, NullLoader, RenderError, Template, Val};
use indoc::indoc;
use std::sync::Arc;

fn rick() -> Context {
    Context::new().with("name", "Rick")
}

fn compile(src: &str, options: CompileOptions) -> miette::Result<Arc<Template>> {
    Ok(Arc::new(Template::from_markup("test.html", src, &options)?))
}

fn render_with(src: &str, options: CompileOptions, context: Context) -> String {
    compile(src, options)
        .and_then(|t| t.render(context, Arc::new(NullLoader)))
        .unwrap_or_else(|err| panic!("{err:?}"))
}

fn render_mode(src: &str, mode: Mode) -> String {
    let options = CompileOptions {
        mode: Some(mode),
        ..CompileOptions::default()
    };
    render_with(src, options, rick())
}

fn render(src: &str) -> String {
    render_with(src, CompileOptions::default(), rick())
}

#[test]
fn test_empty_attr_in_html() {
    assert_eq!(
        render_mode(r#"<img src="/foo/bar.baz.gif" alt="" />"#, Mode::Html),
        r#"<img alt="" src="/foo/bar.baz.gif">"#
    );
}

#[test]
fn test_pre_whitespace_is_kept() {
    let src = "<pre name=\"foo\">\nHey there.  \n\n    I am indented.\n</pre>";
    assert_eq!(render_mode(src, Mode::Html), src);
    assert_eq!(render_mode(src, Mode::Xml), src);
}

#[test]
fn test_script_is_always_closed() {
    let src = r#"<html><script src="public"/></html>"#;
    let expected = r#"<html><script src="public"></script></html>"#;
    assert_eq!(render_mode(src, Mode::Html), expected);
    assert_eq!(render_mode(src, Mode::Xml), expected);
}

#[test]
fn test_script_cdata_escaping() {
    let script = "if (1 < 2) { doc.write(\"<p>Offen&nbsp;bach</p>\"); }\n";
    let src = format!("<script><![CDATA[\n{script}]]></script>");
    assert_eq!(render_mode(&src, Mode::Html), format!("<script>\n{script}</script>"));
    assert_eq!(
        render_mode(&src, Mode::Xml),
        format!("<script>/*<![CDATA[*/\n{script}/*]]>*/</script>")
    );
}

#[test]
fn test_style_cdata_escaping() {
    let style = "html > body { display: none; }\n";
    let src = format!("<style><![CDATA[\n{style}]]></style>");
    assert_eq!(
        render_mode(&src, Mode::Xml),
        format!("<style>/*<![CDATA[*/\n{style}/*]]>*/</style>")
    );
    assert_eq!(render_mode(&src, Mode::Html), format!("<style>\n{style}</style>"));
}

#[test]
fn test_script_interpolates_variables() {
    let src = "<script><![CDATA[ $name ]]></script>";
    assert_eq!(render_mode(src, Mode::Xml), "<script>/*<![CDATA[*/ Rick /*]]>*/</script>");
    assert_eq!(render_mode(src, Mode::Html), "<script> Rick </script>");
}

#[test]
fn test_cdata_scripts_disabled() {
    let src = "<script> $name </script>";
    for mode in [Mode::Xml, Mode::Html] {
        let options = CompileOptions {
            mode: Some(mode),
            cdata_scripts: false,
            ..CompileOptions::default()
        };
        assert_eq!(render_with(src, options, rick()), "<script> Rick </script>");
    }
}

#[test]
fn test_cdata_sections_outside_scripts() {
    let src = "<myxml><data><![CDATA[&gt;&#240; $name]]></data></myxml>";
    let expected = "<myxml><data><![CDATA[&gt;&#240; Rick]]></data></myxml>";
    assert_eq!(render_mode(src, Mode::Xml), expected);
    assert_eq!(render_mode(src, Mode::Html), expected);

    let src = "<myxml><data><![CDATA[&gt;&#240; $name]]> &gt;</data></myxml>";
    let expected = "<myxml><data><![CDATA[&gt;&#240; Rick]]> &gt;</data></myxml>";
    assert_eq!(render_mode(src, Mode::Xml), expected);
}

#[test]
fn test_script_with_commented_cdata() {
    let script = "if (1 < 2) { doc.write(\"<p>Offen&nbsp;bach</p>\"); }\n";
    let src = format!("<script>/*<![CDATA[*/\n{script}/*]]>*/</script>");
    assert_eq!(render_mode(&src, Mode::Html), format!("<script>/**/\n{script}/**/</script>"));
    assert_eq!(
        render_mode(&src, Mode::Xml),
        format!("<script>/*<![CDATA[*//**/\n{script}/**//*]]>*/</script>")
    );
}

#[test]
fn test_dollar_escapes() {
    assert_eq!(render("<div>$$</div>"), "<div>$</div>");
    assert_eq!(render("<div>$$$</div>"), "<div>$$</div>");
    assert_eq!(render("<div>$$$$</div>"), "<div>$$</div>");
    assert_eq!(render("<div>$(</div>"), "<div>$(</div>");
    assert_eq!(render("<div>$.</div>"), "<div>$.</div>");
}

#[test]
fn test_expressions() {
    assert_eq!(render("<div>Hello, $name</div>"), "<div>Hello, Rick</div>");
    assert_eq!(render("<div>Hello, ${name}</div>"), "<div>Hello, Rick</div>");
    assert_eq!(render("<div>Hello, ${{'name':name}['name']}</div>"), "<div>Hello, Rick</div>");
    let multiline = indoc! {"
        <div>Hello, ${{'name': 'Rick',
                       'age': 26}['name']}</div>"};
    assert_eq!(render(multiline), "<div>Hello, Rick</div>");
}

#[test]
fn test_jquery_calls_are_text() {
    let js = "$(function () { alert('.ready()'); });";
    let src = format!("<html><pre>{js}</pre><script>{js}</script></html>");
    assert_eq!(
        render(&src),
        format!("<html><pre>{js}</pre><script>/*<![CDATA[*/{js}/*]]>*/</script></html>")
    );
}

#[test]
fn test_entities() {
    assert_eq!(render("<div>Cookies &amp; Cream</div>"), "<div>Cookies &amp; Cream</div>");
    assert_eq!(
        render("<div>Spam&nbsp;Spam &lt; Spam &gt; Spam &hellip;</div>"),
        "<div>Spam\u{a0}Spam &lt; Spam &gt; Spam \u{2026}</div>"
    );
}

#[test]
fn test_switch() {
    let src = indoc! {r#"
        <div py:for="i in range(2)">
        $i is <py:switch test="i % 2">
        <py:case value="0">even</py:case>
        <py:else>odd</py:else>
        </py:switch></div>"#};
    assert_eq!(render(src), "<div>\n0 is even</div><div>\n1 is odd</div>");
}

#[test]
fn test_switch_inline() {
    let src = r#"<div py:for="i in range(2)">$i is <py:switch test="i % 2"><py:case value="0">even</py:case><py:else>odd</py:else></py:switch></div>"#;
    assert_eq!(render(src), "<div>0 is even</div><div>1 is odd</div>");
}

#[test]
fn test_switch_multi() {
    let src = indoc! {r#"
        <div py:for="i in range(8)">
        $i is <py:switch test="i % 4">
        <py:case value="0">ok</py:case>
        <py:case value="1">nearly</py:case>
        <py:else>nope</py:else>
        </py:switch></div>"#};
    let expected: String = ["ok", "nearly", "nope", "nope", "ok", "nearly", "nope", "nope"]
        .iter()
        .enumerate()
        .map(|(i, word)| format!("<div>\n{i} is {word}</div>"))
        .collect();
    assert_eq!(render(src), expected);
}

#[test]
fn test_switch_nested() {
    let src = concat!(
        r#"<div py:for="i in range(4)"><py:switch test="i // 2">"#,
        r#"<py:case value="0"><py:switch test="i % 2"><py:case value="0">a</py:case><py:else>b</py:else></py:switch></py:case>"#,
        r#"<py:else>c</py:else></py:switch></div>"#,
    );
    assert_eq!(render(src), "<div>a</div><div>b</div><div>c</div><div>c</div>");
}

#[test]
fn test_case_on_elements() {
    let src = indoc! {r#"
        <div>
            <py:switch test="True">
              <span py:case="0 == 1">0</span>
              <span py:case="1 == 1">1</span>
              <span py:else="">2</span>
            </py:switch>
          </div>"#};
    assert_eq!(render(src), "<div>\n    <span>1</span>\n  </div>");
}

#[test]
fn test_switch_on_a_tag_is_rejected() {
    let src = indoc! {r#"
        <div class="test" py:switch="5 == 3">
            <p py:case="True">True</p>
            <p py:else="">False</p>
        </div>"#};
    let err = compile(src, CompileOptions::default()).unwrap_err();
    assert!(err.downcast_ref::<CompileError>().is_some());
    assert!(err.to_string().contains("py:switch directive can only contain py:case and py:else nodes"));
}

#[test]
fn test_else_must_follow_if() {
    let src = indoc! {r#"
        <div>
            <div py:if="False">True</div>
            <py:else>False</py:else>
        </div>"#};
    let err = compile(src, CompileOptions::default()).unwrap_err();
    assert!(err.to_string().contains("py:else directive must be inside a py:switch or directly after py:if"));

    assert_eq!(
        render(r#"<div><div py:if="False">True</div><py:else>False</py:else></div>"#),
        "<div>False</div>"
    );
    assert_eq!(
        render(r#"<div><py:if test="False">True</py:if><py:else>False</py:else></div>"#),
        "<div>False</div>"
    );
}

#[test]
fn test_with() {
    let src = indoc! {r#"
        <div py:with="a='foo';b=3">
        <div>$a - $b</div>
        <div py:with="a=5;b=1">$a - $b</div>
        <div>$a - $b</div>
        </div>"#};
    assert_eq!(
        render(src),
        "<div>\n<div>foo - 3</div>\n<div>5 - 1</div>\n<div>foo - 3</div>\n</div>"
    );
    assert_eq!(render(r#"<div py:with="a = 'foo';">$a</div>"#), "<div>foo</div>");
    assert_eq!(render(r#"<div py:with="a=';';b='-)'">$a$b</div>"#), "<div>;-)</div>");
    assert_eq!(
        render(r#"<div><py:with vars="a=';';b='-)'">$a$b</py:with></div>"#),
        "<div>;-)</div>"
    );
    assert_eq!(render(r#"<div py:with="a='foo';b=a * 2">$a $b</div>"#), "<div>foo foofoo</div>");
}

#[test]
fn test_functions() {
    let src = indoc! {r#"
        <div
        ><div py:def="evenness(n)"><py:if test="n % 2 == 0">even</py:if><py:else>odd</py:else></div>
        <py:for each="i in range(2)">$i is ${evenness(i)}
        </py:for
        ></div>"#};
    assert_eq!(render(src), "<div>\n0 is <div>even</div>\n1 is <div>odd</div>\n</div>");
    assert_eq!(render(r#"<div><py:def function="bruhaha()"></py:def></div>"#), "<div></div>");
}

#[test]
fn test_function_in_attribute() {
    let src = indoc! {r#"
        <div
        ><py:def function="attrtest(n, sz=16)">text/$sz/$n</py:def><img
        src="${attrtest(name)}"/></div>"#};
    assert_eq!(render(src), r#"<div><img src="text/16/Rick"/></div>"#);
}

#[test]
fn test_call() {
    let src = indoc! {r#"
        <div
        ><py:def function="quote(caller, speaker)"
        ><ul>
            <li py:for="i in range(2)">Quoth $speaker, ${caller(i)}</li>
        </ul></py:def
        ><py:call args="n" function="quote(%caller, 'the raven')"
        >Nevermore $n</py:call></div>"#};
    assert_eq!(
        render(src),
        "<div><ul>\n    <li>Quoth the raven, Nevermore 0</li><li>Quoth the raven, Nevermore 1</li>\n</ul></div>"
    );
}

#[test]
fn test_closure() {
    let src = indoc! {r#"
        <div
        ><py:def function="add(x)"
            ><py:def function="inner(y)"
                >${x+y}</py:def
            >${inner(x*2)}</py:def
        >${add(5)}</div>"#};
    assert_eq!(render(src), "<div>15</div>");
}

#[test]
fn test_embedded_code() {
    let src = indoc! {r#"
        <div
        ><?py #
            parts = ['a', 'b', 'c']
            joined = '/'.join(parts)
        ?>$joined</div>"#};
    assert_eq!(render(src), "<div>a/b/c</div>");

    let src = indoc! {r#"
        <div
        ><?py %path = 'a/b/c'
        ?><py:def function="test()"
        >${path}</py:def
        >${test()}</div>"#};
    assert_eq!(render(src), "<div>a/b/c</div>");
}

#[test]
fn test_comments() {
    assert_eq!(
        render("<div><!-- This comment is preserved. --><!--! This comment is stripped. --></div>"),
        "<div><!--  This comment is preserved.  --></div>"
    );
}

#[test]
fn test_attributes() {
    assert_eq!(render(r#"<div id="foo"/>"#), r#"<div id="foo"/>"#);
    assert_eq!(render(r#"<div py:content="'foo'"/>"#), "<div>foo</div>");
    assert_eq!(render(r#"<div py:replace="'foo'"/>"#), "foo");
}

#[test]
fn test_attrs_directive() {
    assert_eq!(render(r#"<div py:attrs="dict(a=5, b=6)"/>"#), r#"<div a="5" b="6"/>"#);
    assert_eq!(render(r#"<div py:attrs="[('a', 5), ('b', 6)]"/>"#), r#"<div a="5" b="6"/>"#);
    assert_eq!(render(r#"<div py:attrs="None"/>"#), "<div/>");
    assert_eq!(render(r#"<div py:attrs="dict(checked=True)"/>"#), r#"<div checked="checked"/>"#);
    assert_eq!(render(r#"<div py:attrs="dict(checked=False)"/>"#), "<div/>");
    assert_eq!(render(r#"<div py:attrs="dict(checked=None)"/>"#), "<div/>");
}

#[test]
fn test_boolean_attributes_in_html() {
    let src = r#"<input type="checkbox" checked="$on" disabled="${None}"/>"#;
    let context = Context::new().with("on", true);
    let options = CompileOptions {
        mode: Some(Mode::Html),
        ..CompileOptions::default()
    };
    assert_eq!(render_with(src, options, context.clone()), r#"<input checked type="checkbox">"#);
    assert_eq!(
        render_with(src, CompileOptions::default(), context),
        r#"<input checked="checked" type="checkbox"/>"#
    );
}

#[test]
fn test_attribute_parts_that_are_all_none_are_omitted() {
    let context = Context::new().with("a", Val::none()).with("b", "x");
    let src = r#"<p title="${a}${a}" class="${a}${b}"/>"#;
    assert_eq!(render_with(src, CompileOptions::default(), context), r#"<p class="x"/>"#);
}

#[test]
fn test_strip() {
    let src = r#"<div><h1 py:strip="header">Header</h1></div>"#;
    let render_header = |header: bool| {
        render_with(src, CompileOptions::default(), Context::new().with("header", header))
    };
    assert_eq!(render_header(true), "<div>Header</div>");
    assert_eq!(render_header(false), "<div><h1>Header</h1></div>");
}

#[test]
fn test_doctypes() {
    assert_eq!(
        render_mode("<html><body><br/><p>x</p></body></html>", Mode::Html5),
        "<!DOCTYPE html>\n<html><body><br><p>x</p></body></html>"
    );
    assert_eq!(render("<!DOCTYPE html>\n<html/>"), "<!DOCTYPE html>\n<html></html>");

    let options = CompileOptions {
        mode: Some(Mode::Html5),
        fragment: true,
        ..CompileOptions::default()
    };
    assert_eq!(render_with("<p/>", options, rick()), "<p></p>");
}

#[test]
fn test_translation_hook() {
    let mut context = rick();
    context.register_fn("gettext", |args, _| {
        let text = args.first().map(|a| a.to_text()).transpose()?.unwrap_or_default();
        Ok(Val::from(format!("[{text}]")))
    });
    let src = "<div>Hello, <b>$name</b>! <script>var x;</script></div>";
    assert_eq!(
        render_with(src, CompileOptions::default(), context),
        "<div>[Hello, ]<b>Rick</b>[! ]<script>/*<![CDATA[*/var x;/*]]>*/</script></div>"
    );
}

#[test]
fn test_render_errors_carry_position() {
    let template = compile("<div>\n<p>${undefined_thing}</p>\n</div>", CompileOptions::default()).unwrap();
    let err = template.render(rick(), Arc::new(NullLoader)).unwrap_err();
    let render = err.downcast_ref::<RenderError>().expect("a render error");
    assert_eq!(render.filename, "test.html");
    assert_eq!(render.line, 2);
    assert!(render.message.contains("undefined_thing"));
}

#[test]
fn test_streaming_matches_render() {
    let template = compile(r#"<ul><li py:for="i in range(3)">$i</li></ul>"#, CompileOptions::default()).unwrap();
    let streamed: Vec<String> = template
        .stream(Context::new(), Arc::new(NullLoader))
        .unwrap()
        .collect::<miette::Result<_>>()
        .unwrap();
    assert!(streamed.len() > 1);
    assert_eq!(streamed.concat(), "<ul><li>0</li><li>1</li><li>2</li></ul>");
}

#[test]
fn test_functions_read_variables_when_called() {
    let src = indoc! {r#"
        <div><py:def function="outer()"
        ><?py x = 1 ?><span py:def="show()">$x</span
        >${show()}<?py x = 2 ?></py:def
        >${outer()}</div>"#};
    assert_eq!(render(src), "<div><span>1</span></div>");

    let src = indoc! {r#"
        <div><py:def function="twice(caller)">${caller()}${caller()}</py:def
        ><py:def function="outer()"
        ><?py x = 1 ?><py:call function="twice(%caller)">[$x]</py:call
        ><?py x = 2 ?></py:def
        >${outer()}</div>"#};
    assert_eq!(render(src), "<div>[1][1]</div>");
}

#[test]
fn test_integer_overflow_is_a_render_error() {
    for expr in ["(-9223372036854775807 - 1) // -1", "(-9223372036854775807 - 1) % -1", "-(-9223372036854775807 - 1)"] {
        let src = format!("<p>${{{expr}}}</p>");
        let template = compile(&src, CompileOptions::default()).unwrap();
        let err = template.render(Context::new(), Arc::new(NullLoader)).unwrap_err();
        assert!(err.downcast_ref::<RenderError>().is_some(), "{expr}: {err:?}");
    }
    assert_eq!(render("<p>${range(9223372036854775805, 9223372036854775807, 5)}</p>"), "<p>[9223372036854775805]</p>");
}

#[test]
fn test_safe_values_in_attributes_are_escaped_once() {
    assert_eq!(
        render(r#"<a title="${literal('&amp;')} x" alt="${literal('&amp;')}"/>"#),
        r#"<a alt="&amp;" title="&amp; x"/>"#
    );
    let mut context = rick();
    context.set_safe("q", "\"quoted\"");
    assert_eq!(
        render_with(r#"<a title="$q"/>"#, CompileOptions::default(), context),
        r#"<a title="&quot;quoted&quot;"/>"#
    );
}
