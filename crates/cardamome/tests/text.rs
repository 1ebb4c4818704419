use cardamome::{Context, Loader, MemoryLoader, NullLoader, Template, VObject, VString, Value};
use indoc::indoc;
use std::sync::Arc;

fn render_text(src: &str, autoescape: bool, context: Context) -> String {
    let template = Template::from_text("test.txt", src, autoescape).unwrap_or_else(|err| panic!("{err:?}"));
    Arc::new(template)
        .render(context, Arc::new(NullLoader))
        .unwrap_or_else(|err| panic!("{err:?}"))
}

fn render(src: &str, context: Context) -> String {
    render_text(src, false, context)
}

fn render_loaded(loader: &Arc<MemoryLoader>, name: &str, context: Context) -> String {
    let template = loader.load(name).unwrap_or_else(|err| panic!("{err:?}"));
    template
        .render(context, loader.clone())
        .unwrap_or_else(|err| panic!("{err:?}"))
}

fn rick() -> Context {
    Context::new().with("name", "Rick")
}

#[test]
fn test_basic() {
    assert_eq!(render("Hello, $name\n", rick()), "Hello, Rick\n");
    assert_eq!(render("Hello, ${name}!\n", rick()), "Hello, Rick!\n");
}

#[test]
fn test_autoescape() {
    let context = || Context::new().with("name", "<Rick>");
    assert_eq!(
        render_text("<h1>Hello, ${name}</h1>", true, context()),
        "<h1>Hello, &lt;Rick&gt;</h1>"
    );
    assert_eq!(render_text("<h1>Hello, ${name}</h1>", false, context()), "<h1>Hello, <Rick></h1>");
    assert_eq!(
        render_text("${literal('<b>')}", true, Context::new()),
        "<b>"
    );
}

#[test]
fn test_none_renders_nothing() {
    assert_eq!(render("Hello, ${None}!", Context::new()), "Hello, !");
}

#[test]
fn test_dotted_names() {
    let mut object = VObject::new();
    object.insert(VString::from("name"), Value::from("Rick"));
    let value: Value = object.into();
    let context = Context::new().with("obj", value);
    assert_eq!(render("Hello, $obj.name.\n", context), "Hello, Rick.\n");
}

#[test]
fn test_escapes() {
    assert_eq!(render("costs \\$5 or $$6\n", Context::new()), "costs $5 or $6\n");
    assert_eq!(render("one \\\ntwo\n", Context::new()), "one two\n");
}

#[test]
fn test_for_and_if() {
    let src = indoc! {"
        %for i in range(3)
        %if i == 1
        one
        %else
        $i
        %end
        %end
    "};
    assert_eq!(render(src, Context::new()), "0\none\n2\n");
}

#[test]
fn test_switch() {
    let src = indoc! {"
        %for i in range(2)
        %switch i % 2
        %case 0
        $i is even
        %case 1
        $i is odd
        %end
        %end
    "};
    assert_eq!(render(src, Context::new()), "0 is even\n1 is odd\n");
}

#[test]
fn test_switch_else_closes_the_switch() {
    let src = indoc! {"
        %for i in range(3)
        %switch i
        %case 0
        zero
        %else
        many
        %end
        %end
    "};
    assert_eq!(render(src, Context::new()), "zero\nmany\nmany\n");
}

#[test]
fn test_inline_tags() {
    assert_eq!(
        render("{%for i in range(3)%}$i,{%end%}", Context::new()),
        "0,1,2,"
    );
    assert_eq!(
        render("{%if x-%}   yes{%end%}", Context::new().with("x", true)),
        "yes"
    );
}

#[test]
fn test_ljust() {
    let src = "%for i in range(2)\n    {%-if i%}$i{%end%}\n%end\n";
    assert_eq!(render(src, Context::new()), "\n1\n");
}

#[test]
fn test_function() {
    let src = indoc! {"
        %def evenness(n)
        %if n % 2 == 0
        even\\
        %else
        odd\\
        %end
        %end
        %for i in range(2)
        $i is ${evenness(i)}
        %end
    "};
    assert_eq!(render(src, Context::new()), "0 is even\n1 is odd\n");
}

#[test]
fn test_call() {
    let src = indoc! {"
        %def quote(caller, speaker)
        %for i in range(2)
        Quoth $speaker, ${caller(i)}
        %end
        %end
        %call(n) quote(%caller, 'the raven')
        Nevermore $n\\
        %end
    "};
    assert_eq!(
        render(src, Context::new()),
        "Quoth the raven, Nevermore 0\nQuoth the raven, Nevermore 1\n"
    );
}

#[test]
fn test_closure() {
    let src = indoc! {"
        %def add(x)
        %def inner(y)
        ${x + y}\\
        %end
        ${inner(x * 2)}\\
        %end
        ${add(5)}
    "};
    assert_eq!(render(src, Context::new()), "15\n");
}

#[test]
fn test_embedded_code() {
    assert_eq!(render("%py x = 21 * 2\n$x\n", Context::new()), "42\n");

    let src = indoc! {"
        %py
            greeting = 'Hello'
            target = name.upper()
        %end
        $greeting, $target
    "};
    assert_eq!(render(src, rick()), "Hello, RICK\n");
}

#[test]
fn test_import() {
    let loader = Arc::new(
        MemoryLoader::new()
            .with(
                "lib.txt",
                indoc! {"
                    %def evenness(n)
                    %if n % 2 == 0
                    even\\
                    %else
                    odd\\
                    %end
                    %end
                    %def half_evenness(n)
                    half of $n is ${evenness(n // 2)}\\
                    %end
                "},
            )
            .with(
                "tpl.txt",
                indoc! {r#"
                    %import "lib.txt" as simple_function
                    %for i in range(4)
                    $i is ${simple_function.evenness(i)} ${simple_function.half_evenness(i)}
                    %end
                "#},
            ),
    );
    assert_eq!(
        render_loaded(&loader, "tpl.txt", Context::new()),
        indoc! {"
            0 is even half of 0 is even
            1 is odd half of 1 is even
            2 is even half of 2 is odd
            3 is odd half of 3 is odd
        "}
    );
}

#[test]
fn test_include() {
    let loader = Arc::new(
        MemoryLoader::new()
            .with("hdr.txt", "# header\n")
            .with("tpl.txt", "a\n%include \"hdr.txt\"\nb\n"),
    );
    assert_eq!(render_loaded(&loader, "tpl.txt", Context::new()), "a\n# header\nb\n");
}

#[test]
fn test_extends() {
    let loader = Arc::new(
        MemoryLoader::new()
            .with(
                "parent.txt",
                indoc! {"
                    %def header()
                    # Header name=$name
                    %end
                    %def footer()
                    # Footer
                    %end
                    %def body()
                    ## Parent Body
                    id() = ${id()}
                    local.id() = ${local.id()}
                    self.id() = ${self.id()}
                    child.id() = ${child.id()}
                    %end
                    %def id()
                    parent\\
                    %end
                    ${header()}${body()}${footer()}
                "},
            )
            .with(
                "mid.txt",
                indoc! {r#"
                    %extends "parent.txt"
                    %def id()
                    mid\
                    %end
                "#},
            )
            .with(
                "child.txt",
                indoc! {r#"
                    %extends "mid.txt"
                    %def id()
                    child\
                    %end
                    %def body()
                    ## Child Body
                    ${parent.body()}\
                    %end
                "#},
            ),
    );
    assert_eq!(
        render_loaded(&loader, "child.txt", rick()),
        indoc! {"
            # Header name=Rick
            ## Child Body
            ## Parent Body
            id() = child
            local.id() = parent
            self.id() = child
            child.id() = mid
            # Footer

        "}
    );
}

#[test]
fn test_dynamic_extends() {
    let loader = Arc::new(
        MemoryLoader::new()
            .with("parent0.txt", "Parent 0")
            .with("parent1.txt", "Parent 1")
            .with(
                "child.txt",
                indoc! {r#"
                    %if p == 0
                    %extends "parent0.txt"
                    %else
                    %extends "parent1.txt"
                    %end
                "#},
            ),
    );
    assert_eq!(render_loaded(&loader, "child.txt", Context::new().with("p", 0i64)), "Parent 0");
    assert_eq!(render_loaded(&loader, "child.txt", Context::new().with("p", 1i64)), "Parent 1");
}

#[test]
fn test_block() {
    let loader = Arc::new(
        MemoryLoader::new()
            .with(
                "parent.txt",
                indoc! {"
                    %def greet(name)
                    Hello, $name!\\
                    %end
                    %def sign(name)
                    Sincerely,
                    $name\\
                    %end
                    ${greet(to)}

                    %block body
                    It was good seeing you last Friday.
                    Thanks for the gift!
                    %end

                    ${sign(from_)}
                "},
            )
            .with(
                "child.txt",
                indoc! {r#"
                    %extends "parent.txt"
                    %def greet(name)
                    Dear $name:\
                    %end
                    %block body
                    ${parent_block()}\
                    And don't forget you owe me money!
                    %end
                "#},
            ),
    );
    let context = || Context::new().with("to", "Mark").with("from_", "Rick");

    assert_eq!(
        render_loaded(&loader, "parent.txt", context()),
        indoc! {"
            Hello, Mark!
            It was good seeing you last Friday.
            Thanks for the gift!

            Sincerely,
            Rick
        "}
    );
    assert_eq!(
        render_loaded(&loader, "child.txt", context()),
        indoc! {"
            Dear Mark:
            It was good seeing you last Friday.
            Thanks for the gift!
            And don't forget you owe me money!

            Sincerely,
            Rick
        "}
    );
}

#[test]
fn test_unclosed_tag_is_a_compile_error() {
    let err = Template::from_text("bad.txt", "%for i in range(2)\n$i\n", false).unwrap_err();
    assert!(err.to_string().contains("never closed"));
}
