use cardamome::{Context, Loader, LoaderError, LoaderOptions, MemoryLoader};
use indoc::indoc;
use std::sync::Arc;

fn render(loader: &Arc<MemoryLoader>, name: &str, context: Context) -> String {
    let template = loader.load(name).unwrap_or_else(|err| panic!("{err:?}"));
    template
        .render(context, loader.clone())
        .unwrap_or_else(|err| panic!("{err:?}"))
}

const LIB: &str = indoc! {r#"
    <div>
    <span py:def="evenness(n)"
        ><py:if test="n % 2 == 0"
            >even</py:if
        ><py:else
            >odd</py:else
    ></span>
    <py:def function="half_evenness(n)"
        >half of $n is ${evenness(n // 2)}</py:def>
    </div>"#};

const IMPORT_EXPECTED: &str = indoc! {"
    <div>
    <ul>
        <li>
            0 is <span>even</span> half of 0 is <span>even</span>
        </li><li>
            1 is <span>odd</span> half of 1 is <span>even</span>
        </li><li>
            2 is <span>even</span> half of 2 is <span>odd</span>
        </li><li>
            3 is <span>odd</span> half of 3 is <span>odd</span>
        </li>
    </ul>
    </div>"};

#[test]
fn test_import_with_alias() {
    let loader = Arc::new(MemoryLoader::new().with("lib.html", LIB).with(
        "tpl.html",
        indoc! {r#"
            <div>
            <py:import href="lib.html" alias="simple_function"
            /><ul>
                <li py:for="i in range(4)">
                    $i is ${simple_function.evenness(i)} ${simple_function.half_evenness(i)}
                </li>
            </ul>
            </div>"#},
    ));
    assert_eq!(render(&loader, "tpl.html", Context::new()), IMPORT_EXPECTED);
}

#[test]
fn test_import_default_alias() {
    let loader = Arc::new(MemoryLoader::new().with("lib.html", LIB).with(
        "tpl.html",
        indoc! {r#"
            <div>
            <py:import href="lib.html"
            /><ul>
                <li py:for="i in range(4)">
                    $i is ${lib.evenness(i)} ${lib.half_evenness(i)}
                </li>
            </ul>
            </div>"#},
    ));
    assert_eq!(render(&loader, "tpl.html", Context::new()), IMPORT_EXPECTED);
}

#[test]
fn test_include_sees_the_context() {
    let loader = Arc::new(
        MemoryLoader::new()
            .with(
                "included.html",
                "<p>The included template must also access the template context: ${value_of(\"name\")}</p>\n",
            )
            .with(
                "tpl.html",
                "<html><body><p>This is the body</p>\n<py:include href=\"included.html\"/></body></html>",
            ),
    );
    assert_eq!(
        render(&loader, "tpl.html", Context::new().with("name", "Rick")),
        "<html><body><p>This is the body</p>\n<p>The included template must also access the template context: Rick</p></body></html>"
    );
}

#[test]
fn test_extends_chain() {
    let loader = Arc::new(
        MemoryLoader::new()
            .with(
                "parent.html",
                indoc! {r#"
                    <div
                    ><h1 py:def="header()">Header name=$name</h1
                    ><h6 py:def="footer()">Footer</h6
                    ><div py:def="body()">
                    id() = ${id()}
                    local.id() = ${local.id()}
                    self.id() = ${self.id()}
                    child.id() = ${child.id()}
                    </div><span py:def="id()">parent</span>
                    ${header()}
                    ${body()}
                    ${footer()}
                    </div>"#},
            )
            .with(
                "mid.html",
                indoc! {r#"
                    <py:extends href="parent.html"
                    ><span py:def="id()">mid</span
                    ></py:extends>"#},
            )
            .with(
                "child.html",
                indoc! {r#"
                    <py:extends href="mid.html"
                    ><span py:def="id()">child</span
                    ><div py:def="body()">
                    <h2>Child Body</h2>
                    ${parent.body()}
                    </div></py:extends>"#},
            ),
    );
    let expected = indoc! {"
        <div>
        <h1>Header name=Rick</h1>
        <div>
        <h2>Child Body</h2>
        <div>
        id() = <span>child</span>
        local.id() = <span>parent</span>
        self.id() = <span>child</span>
        child.id() = <span>mid</span>
        </div>
        </div>
        <h6>Footer</h6>
        </div>"};
    assert_eq!(render(&loader, "child.html", Context::new().with("name", "Rick")), expected);
}

#[test]
fn test_dynamic_extends() {
    let loader = Arc::new(
        MemoryLoader::new()
            .with("parent0.html", "<span>Parent 0</span>")
            .with("parent1.html", "<span>Parent 1</span>")
            .with(
                "child.html",
                indoc! {r#"
                    <div
                    ><py:if test="p == 0"><py:extends href="parent0.html"/></py:if
                    ><py:else><py:extends href="parent1.html"/></py:else
                    ></div>
                "#},
            ),
    );
    assert_eq!(
        render(&loader, "child.html", Context::new().with("p", 0i64)),
        "<div><span>Parent 0</span></div>"
    );
    assert_eq!(
        render(&loader, "child.html", Context::new().with("p", 1i64)),
        "<div><span>Parent 1</span></div>"
    );
}

fn letters() -> Arc<MemoryLoader> {
    Arc::new(
        MemoryLoader::new()
            .with(
                "parent.html",
                indoc! {r#"
                    <div
                    ><py:def function="greet(name)"
                    >Hello, $name!</py:def
                    ><py:def function="sign(name)"
                    >Sincerely,<br/><em>$name</em></py:def
                    >${greet(to)}

                    <p py:block="body">It was good seeing you last Friday.
                    Thanks for the gift!</p>

                    ${sign(from_)}
                    </div>"#},
            )
            .with(
                "child.html",
                indoc! {r#"
                    <py:extends href="parent.html"
                    ><py:def function="greet(name)"
                    >Dear $name:</py:def
                    ><py:block name="body">${parent_block()}
                    <p>And don't forget you owe me money!</p>
                    </py:block
                    ></py:extends>
                "#},
            ),
    )
}

fn letter_context() -> Context {
    Context::new().with("to", "Mark").with("from_", "Rick")
}

#[test]
fn test_block_in_parent() {
    let expected = indoc! {"
        <div>Hello, Mark!

        <p>It was good seeing you last Friday.
        Thanks for the gift!</p>

        Sincerely,<br/><em>Rick</em>
        </div>"};
    assert_eq!(render(&letters(), "parent.html", letter_context()), expected);
}

#[test]
fn test_block_override_calls_parent_block() {
    let expected = indoc! {"
        <div>Dear Mark:

        <p>It was good seeing you last Friday.
        Thanks for the gift!</p>
        <p>And don't forget you owe me money!</p>


        Sincerely,<br/><em>Rick</em>
        </div>"};
    assert_eq!(render(&letters(), "child.html", letter_context()), expected);
}

#[test]
fn test_block_override_replaces_parent_content() {
    let loader = Arc::new(
        MemoryLoader::new()
            .with("parent.html", r#"<div><p py:block="body">parent</p></div>"#)
            .with(
                "child.html",
                r#"<py:extends href="parent.html"><py:block name="body"><em>child</em></py:block></py:extends>"#,
            ),
    );
    assert_eq!(render(&loader, "child.html", Context::new()), "<div><em>child</em></div>");
}

fn autoblock_loader(parent: &str) -> Arc<MemoryLoader> {
    let loader = MemoryLoader::with_options(LoaderOptions {
        autoblocks: vec!["body".to_string()],
        ..LoaderOptions::default()
    });
    loader.add("parent.html", parent);
    loader.add(
        "child.html",
        indoc! {r#"

            <html>
            <py:extends href="parent.html"/>
            <body><em>Great conference this weekend!</em></body>
            </html>"#},
    );
    Arc::new(loader)
}

#[test]
fn test_autoblocks() {
    let loader = autoblock_loader(indoc! {r#"

        <html py:strip="">
        <head></head>
        <body py:autoblock="False">
            <p py:block="body">It was good seeing you last Friday.
            Thanks for the gift!</p>
        </body>
        </html>"#});

    assert_eq!(
        render(&loader, "parent.html", Context::new()),
        "\n<head/>\n<body>\n    <p>It was good seeing you last Friday.\n    Thanks for the gift!</p>\n</body>\n"
    );
    assert_eq!(
        render(&loader, "child.html", Context::new()),
        "<html>\n\n<head/>\n<body>\n    <em>Great conference this weekend!</em>\n</body>\n\n\n</html>"
    );
}

#[test]
fn test_autoblock_flag_must_be_a_constant() {
    let loader = autoblock_loader(r#"<html><body py:autoblock="maybe"/></html>"#);
    let err = loader.load("parent.html").unwrap_err();
    assert!(err.to_string().contains("only accepts True/False"));
}

#[test]
fn test_missing_template() {
    let loader = Arc::new(MemoryLoader::new().with("tpl.html", r#"<div><py:include href="nope.html"/></div>"#));
    let template = loader.load("tpl.html").unwrap();
    let err = template.render(Context::new(), loader.clone()).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<LoaderError>(),
        Some(LoaderError::NotFound { name, .. }) if name == "nope.html"
    ));
}

#[test]
fn test_templates_are_cached_across_renders() {
    let loader = letters();
    let first = loader.load("child.html").unwrap();
    let second = loader.load("child.html").unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(
        render(&loader, "child.html", letter_context()),
        render(&loader, "child.html", letter_context())
    );
}
